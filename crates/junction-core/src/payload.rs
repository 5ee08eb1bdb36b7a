//! Payload Transformer: the downstream submission document.

use crate::files::MasterFile;
use crate::mods::Fields;
use serde::Serialize;

/// The JSON document posted to the downstream repository for a media object.
#[derive(Debug, Serialize)]
pub struct AvalonPayload {
    pub fields: Fields,
    pub files: Vec<MasterFile>,
    pub collection_id: String,
    pub publish: bool,
    pub replace_masterfiles: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_bib_record: Option<bool>,
}

/// Assemble the submission document.
///
/// `import_bib_record` is set only when a bibliographic id was extracted.
/// `prior_pid` carries the previously assigned downstream identifier when a
/// migrated object is being recreated, so lineage survives the new identity.
pub fn build_payload(
    mut fields: Fields,
    files: Vec<MasterFile>,
    collection_id: String,
    prior_pid: Option<String>,
) -> AvalonPayload {
    let import_bib_record = fields.bibliographic_id.is_some().then_some(true);
    if let Some(pid) = prior_pid {
        fields.identifier = Some(vec![pid]);
    }
    AvalonPayload {
        fields,
        files,
        collection_id,
        publish: true,
        replace_masterfiles: true,
        import_bib_record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(bib: Option<&str>) -> Fields {
        Fields {
            title: "Untitled".to_string(),
            creator: "Unknown".to_string(),
            date_issued: "unknown/unknown".to_string(),
            bibliographic_id: bib.map(str::to_string),
            other_identifier: vec!["GR1".to_string()],
            other_identifier_type: vec!["other".to_string()],
            identifier: None,
        }
    }

    #[test]
    fn bib_record_import_follows_bibliographic_id() {
        let payload = build_payload(fields(Some("b1234567")), vec![], "col-1".to_string(), None);
        assert_eq!(payload.import_bib_record, Some(true));
        assert!(payload.publish);
        assert!(payload.replace_masterfiles);

        let payload = build_payload(fields(None), vec![], "col-1".to_string(), None);
        assert_eq!(payload.import_bib_record, None);
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("import_bib_record").is_none());
    }

    #[test]
    fn prior_pid_becomes_identifier() {
        let payload = build_payload(
            fields(None),
            vec![],
            "col-1".to_string(),
            Some("avalon:123".to_string()),
        );
        assert_eq!(
            payload.fields.identifier,
            Some(vec!["avalon:123".to_string()])
        );
    }
}
