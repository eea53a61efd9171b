use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hard limit on an uploaded field-layout document, per §6.
pub const MAX_FIELD_LAYOUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FieldTagPose {
    pub translation: [f64; 3],
    /// Stored as `[w, x, y, z]` regardless of the source document's key
    /// case.
    pub quaternion: [f64; 4],
}

/// A parsed field layout: known 3-D poses for a set of tag IDs, keyed by ID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldLayout {
    pub tags: HashMap<i64, FieldTagPose>,
}

impl FieldLayout {
    pub fn get(&self, tag_id: i64) -> Option<&FieldTagPose> {
        self.tags.get(&tag_id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FieldLayoutError {
    #[error("field layout exceeds {MAX_FIELD_LAYOUT_BYTES} byte upload limit")]
    TooLarge,
    #[error("field layout is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("field layout is malformed: {0}")]
    Malformed(String),
}

/// Parse a field-layout JSON document per §6's schema: a `tags` array of
/// `{ID, pose: {translation: {x,y,z}, rotation: {quaternion: {W,X,Y,Z}}}}`
/// entries, with case-insensitive quaternion component keys.
pub fn parse_field_layout(document: &str) -> Result<FieldLayout, FieldLayoutError> {
    if document.len() > MAX_FIELD_LAYOUT_BYTES {
        return Err(FieldLayoutError::TooLarge);
    }

    let value: serde_json::Value = serde_json::from_str(document)?;
    let tags_value = value
        .get("tags")
        .and_then(|v| v.as_array())
        .ok_or_else(|| FieldLayoutError::Malformed("missing 'tags' array".into()))?;

    let mut tags = HashMap::with_capacity(tags_value.len());
    for (index, tag) in tags_value.iter().enumerate() {
        let id = tag
            .get("ID")
            .or_else(|| tag.get("id"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| FieldLayoutError::Malformed(format!("tag at index {index} missing 'ID'")))?;

        let pose = tag
            .get("pose")
            .ok_or_else(|| FieldLayoutError::Malformed(format!("tag {id} missing 'pose'")))?;

        let translation_obj = pose
            .get("translation")
            .ok_or_else(|| FieldLayoutError::Malformed(format!("tag {id} pose missing 'translation'")))?;
        let translation = [
            axis(translation_obj, "x", id)?,
            axis(translation_obj, "y", id)?,
            axis(translation_obj, "z", id)?,
        ];

        let quaternion_obj = pose
            .get("rotation")
            .and_then(|r| r.get("quaternion"))
            .ok_or_else(|| FieldLayoutError::Malformed(format!("tag {id} rotation missing 'quaternion'")))?;
        let quaternion = [
            quat_component(quaternion_obj, 'W', id)?,
            quat_component(quaternion_obj, 'X', id)?,
            quat_component(quaternion_obj, 'Y', id)?,
            quat_component(quaternion_obj, 'Z', id)?,
        ];

        tags.insert(id, FieldTagPose { translation, quaternion });
    }

    Ok(FieldLayout { tags })
}

fn axis(object: &serde_json::Value, key: &str, tag_id: i64) -> Result<f64, FieldLayoutError> {
    object
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| FieldLayoutError::Malformed(format!("tag {tag_id} translation missing '{key}'")))
}

fn quat_component(object: &serde_json::Value, upper: char, tag_id: i64) -> Result<f64, FieldLayoutError> {
    let lower = upper.to_ascii_lowercase();
    object
        .get(upper.to_string())
        .or_else(|| object.get(lower.to_string()))
        .and_then(|v| v.as_f64())
        .ok_or_else(|| {
            FieldLayoutError::Malformed(format!("tag {tag_id} quaternion missing component '{upper}'"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> String {
        serde_json::json!({
            "tags": [
                {
                    "ID": 1,
                    "pose": {
                        "translation": {"x": 1.0, "y": 2.0, "z": 0.5},
                        "rotation": {"quaternion": {"W": 1.0, "X": 0.0, "Y": 0.0, "Z": 0.0}}
                    }
                },
                {
                    "id": 2,
                    "pose": {
                        "translation": {"x": -1.0, "y": 0.0, "z": 0.5},
                        "rotation": {"quaternion": {"w": 0.707, "x": 0.0, "y": 0.0, "z": 0.707}}
                    }
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn parses_valid_layout_with_mixed_key_case() {
        let layout = parse_field_layout(&sample_document()).unwrap();
        assert_eq!(layout.len(), 2);
        assert!(layout.get(1).is_some());
        assert!(layout.get(2).is_some());
    }

    #[test]
    fn rejects_oversized_document() {
        let huge = "x".repeat(MAX_FIELD_LAYOUT_BYTES + 1);
        let err = parse_field_layout(&huge).unwrap_err();
        assert!(matches!(err, FieldLayoutError::TooLarge));
    }

    #[test]
    fn rejects_missing_tags_array() {
        let err = parse_field_layout("{}").unwrap_err();
        assert!(matches!(err, FieldLayoutError::Malformed(_)));
    }

    #[test]
    fn rejects_quaternion_missing_components() {
        let doc = serde_json::json!({
            "tags": [{
                "ID": 1,
                "pose": {
                    "translation": {"x": 0.0, "y": 0.0, "z": 0.0},
                    "rotation": {"quaternion": {"W": 1.0, "X": 0.0}}
                }
            }]
        })
        .to_string();
        assert!(parse_field_layout(&doc).is_err());
    }
}
