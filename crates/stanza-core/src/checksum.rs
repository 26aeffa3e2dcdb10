//! Content-addressable digests for change detection.
//!
//! Everything the outdatedness rules compare is reduced to a SHA-256 hex
//! digest: raw item content, canonicalized attribute maps, and compile
//! instruction lists. `BTreeMap` keeps attribute serialization stable, so
//! equal maps always digest equally.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use stanza_model::{AttributeValue, CompileInstruction};

/// Digest of raw item content.
pub fn digest_content(content: &str) -> String {
    digest_bytes(content.as_bytes())
}

/// Digest of an attribute map, via canonical JSON.
pub fn digest_attributes(attributes: &BTreeMap<String, AttributeValue>) -> String {
    let canonical =
        serde_json::to_string(attributes).expect("attribute maps serialize infallibly");
    digest_bytes(canonical.as_bytes())
}

/// Digest of a compile instruction list, via canonical JSON.
pub fn digest_instructions(instructions: &[CompileInstruction]) -> String {
    let canonical =
        serde_json::to_string(instructions).expect("instruction lists serialize infallibly");
    digest_bytes(canonical.as_bytes())
}

fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_digest_is_stable() {
        // Known SHA-256 hash for "Hello, World!"
        assert_eq!(
            digest_content("Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn attribute_digest_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("title".to_string(), AttributeValue::String("A".into()));
        a.insert("order".to_string(), AttributeValue::Integer(1));

        let mut b = BTreeMap::new();
        b.insert("order".to_string(), AttributeValue::Integer(1));
        b.insert("title".to_string(), AttributeValue::String("A".into()));

        assert_eq!(digest_attributes(&a), digest_attributes(&b));
    }

    #[test]
    fn instruction_digest_changes_with_the_routine() {
        let a = vec![CompileInstruction::Write {
            path: "/a.html".into(),
        }];
        let b = vec![CompileInstruction::Write {
            path: "/b.html".into(),
        }];
        assert_ne!(digest_instructions(&a), digest_instructions(&b));
    }
}
