use serde_json::Value;

use crate::models::Step;

/// Why a structurally valid step could not be applied.
#[derive(Debug, PartialEq, Eq)]
pub enum StepError {
    /// The document root has no `content` array to splice into
    MissingContent,
    OutOfBounds { from: usize, to: usize, len: usize },
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepError::MissingContent => write!(f, "document has no content array"),
            StepError::OutOfBounds { from, to, len } => {
                write!(f, "replace range {}..{} outside document of {} nodes", from, to, len)
            }
        }
    }
}

impl std::error::Error for StepError {}

/// Apply all steps to a working copy of the document.
///
/// The input document is never mutated; a failing step leaves the caller's
/// state untouched so a rejected diff has no side effects.
pub fn apply_all(content: &Value, steps: &[Step]) -> Result<Value, StepError> {
    let mut working = content.clone();
    for step in steps {
        apply_one(&mut working, step)?;
    }
    Ok(working)
}

fn apply_one(doc: &mut Value, step: &Step) -> Result<(), StepError> {
    match step {
        Step::Replace { from, to, slice } => {
            let children = doc
                .get_mut("content")
                .and_then(Value::as_array_mut)
                .ok_or(StepError::MissingContent)?;
            if from > to || *to > children.len() {
                return Err(StepError::OutOfBounds {
                    from: *from,
                    to: *to,
                    len: children.len(),
                });
            }
            let replacement = slice
                .as_ref()
                .map(|s| s.content.clone())
                .unwrap_or_default();
            children.splice(*from..*to, replacement);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{empty_doc, Slice};
    use serde_json::json;

    fn para(text: &str) -> Value {
        json!({ "type": "paragraph", "content": [{ "type": "text", "text": text }] })
    }

    fn doc(texts: &[&str]) -> Value {
        json!({ "type": "doc", "content": texts.iter().map(|t| para(t)).collect::<Vec<_>>() })
    }

    fn insert(at: usize, nodes: Vec<Value>) -> Step {
        Step::Replace {
            from: at,
            to: at,
            slice: Some(Slice { content: nodes }),
        }
    }

    #[test]
    fn insert_into_empty_document() {
        let result = apply_all(&empty_doc(), &[insert(0, vec![para("hello")])]).unwrap();
        assert_eq!(result, doc(&["hello"]));
    }

    #[test]
    fn replace_middle_node() {
        let step = Step::Replace {
            from: 1,
            to: 2,
            slice: Some(Slice {
                content: vec![para("b2")],
            }),
        };
        let result = apply_all(&doc(&["a", "b", "c"]), &[step]).unwrap();
        assert_eq!(result, doc(&["a", "b2", "c"]));
    }

    #[test]
    fn delete_with_empty_slice() {
        let step = Step::Replace {
            from: 0,
            to: 1,
            slice: None,
        };
        let result = apply_all(&doc(&["a", "b"]), &[step]).unwrap();
        assert_eq!(result, doc(&["b"]));
    }

    #[test]
    fn steps_apply_in_order() {
        let steps = vec![insert(0, vec![para("a")]), insert(1, vec![para("b")])];
        let result = apply_all(&empty_doc(), &steps).unwrap();
        assert_eq!(result, doc(&["a", "b"]));
    }

    #[test]
    fn out_of_bounds_leaves_input_untouched() {
        let original = doc(&["a"]);
        let steps = vec![
            insert(1, vec![para("b")]),
            Step::Replace {
                from: 0,
                to: 9,
                slice: None,
            },
        ];
        let err = apply_all(&original, &steps).unwrap_err();
        assert!(matches!(err, StepError::OutOfBounds { len: 2, .. }));
        assert_eq!(original, doc(&["a"]));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = apply_all(&doc(&["a", "b"]), &[Step::Replace { from: 2, to: 1, slice: None }])
            .unwrap_err();
        assert!(matches!(err, StepError::OutOfBounds { .. }));
    }

    #[test]
    fn document_without_content_array_is_rejected() {
        let err = apply_all(&json!({ "type": "doc" }), &[insert(0, vec![])]).unwrap_err();
        assert_eq!(err, StepError::MissingContent);
    }
}
