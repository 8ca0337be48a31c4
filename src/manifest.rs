// src/manifest.rs

//! Package manifest parsing and serialization
//!
//! The manifest is the JSON document delivered alongside a downloaded
//! package. Parsing fails closed: every required field must be present and
//! well-typed, and no partial metadata is ever returned. Field names match
//! the wire form produced by the release tooling (deploymentKey, label,
//! appVersion, isMandatory, packageHash, packageSize, nativeBuildTime,
//! localPath, plus an optional description).

use crate::db::models::PackageMetadata;
use crate::error::{Error, Result};

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::ManifestParse(format!("field '{}' is empty", field)));
    }
    Ok(())
}

/// Parse a package manifest into metadata
///
/// Returns `ManifestParse` on any missing or malformed field.
pub fn parse_package_manifest(content: &str) -> Result<PackageMetadata> {
    let metadata: PackageMetadata = serde_json::from_str(content)
        .map_err(|e| Error::ManifestParse(format!("invalid manifest: {}", e)))?;

    require_non_empty("deploymentKey", &metadata.deployment_key)?;
    require_non_empty("label", &metadata.label)?;
    require_non_empty("appVersion", &metadata.app_version)?;
    require_non_empty("packageHash", &metadata.package_hash)?;
    require_non_empty("localPath", &metadata.local_path)?;
    require_non_empty("nativeBuildTime", &metadata.native_build_time)?;
    if metadata.package_size < 0 {
        return Err(Error::ManifestParse(
            "field 'packageSize' is negative".to_string(),
        ));
    }

    Ok(metadata)
}

/// Serialize metadata back into manifest form
///
/// Losslessly round-trips through [`parse_package_manifest`].
pub fn serialize_package_manifest(metadata: &PackageMetadata) -> String {
    serde_json::to_string(metadata).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn valid_manifest() -> String {
        json!({
            "deploymentKey": "deploy-key",
            "description": "bug fixes",
            "label": "v12",
            "appVersion": "1.4.2",
            "isMandatory": true,
            "packageHash": "abc123",
            "packageSize": 65536,
            "localPath": "pkg-abc123",
            "nativeBuildTime": "1700000000",
        })
        .to_string()
    }

    #[test]
    fn test_parse_valid_manifest() {
        let metadata = parse_package_manifest(&valid_manifest()).unwrap();
        assert_eq!(metadata.label, "v12");
        assert_eq!(metadata.package_hash, "abc123");
        assert_eq!(metadata.package_size, 65536);
        assert!(metadata.is_mandatory);
        assert_eq!(metadata.description.as_deref(), Some("bug fixes"));
    }

    #[test]
    fn test_round_trip() {
        let metadata = parse_package_manifest(&valid_manifest()).unwrap();
        let reparsed = parse_package_manifest(&serialize_package_manifest(&metadata)).unwrap();
        assert_eq!(reparsed, metadata);
    }

    #[test]
    fn test_round_trip_without_description() {
        let mut metadata = parse_package_manifest(&valid_manifest()).unwrap();
        metadata.description = None;
        let reparsed = parse_package_manifest(&serialize_package_manifest(&metadata)).unwrap();
        assert_eq!(reparsed, metadata);
    }

    #[test]
    fn test_missing_field_fails() {
        let mut value: Value = serde_json::from_str(&valid_manifest()).unwrap();
        value.as_object_mut().unwrap().remove("packageHash");

        let result = parse_package_manifest(&value.to_string());
        assert!(matches!(result, Err(crate::Error::ManifestParse(_))));
    }

    #[test]
    fn test_negative_size_fails() {
        let mut value: Value = serde_json::from_str(&valid_manifest()).unwrap();
        value["packageSize"] = json!(-1);

        let result = parse_package_manifest(&value.to_string());
        assert!(matches!(result, Err(crate::Error::ManifestParse(_))));
    }

    #[test]
    fn test_size_as_string_fails() {
        let mut value: Value = serde_json::from_str(&valid_manifest()).unwrap();
        value["packageSize"] = json!("65536");

        let result = parse_package_manifest(&value.to_string());
        assert!(matches!(result, Err(crate::Error::ManifestParse(_))));
    }

    #[test]
    fn test_empty_label_fails() {
        let mut value: Value = serde_json::from_str(&valid_manifest()).unwrap();
        value["label"] = json!("");

        let result = parse_package_manifest(&value.to_string());
        assert!(matches!(result, Err(crate::Error::ManifestParse(_))));
    }

    #[test]
    fn test_not_json_fails() {
        let result = parse_package_manifest("deploymentKey=deploy-key");
        assert!(matches!(result, Err(crate::Error::ManifestParse(_))));
    }
}
