//! Pure classification from raw inscription content to a protocol candidate
//! (spec 4.4). Never touches the network or the store — every decision here
//! is a function of the bytes handed in.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::DeployContent;

lazy_static! {
    // Unanchored substring match (spec 4.4): the bitmap number is whatever
    // digits immediately precede `.bitmap` anywhere in the content, not a
    // requirement that the whole body be exactly `N.bitmap`.
    static ref BITMAP_PATTERN: Regex = Regex::new(r"(\d+)\.bitmap").unwrap();
}

const DEPLOY_PREFIX: &str = "{\"p\":\"brc-420\",\"op\":\"deploy\"";
const MINT_PREFIX: &str = "/content/";

#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Deploy(DeployContent),
    Mint { referenced_id: String },
    Bitmap { number: u64, content: String },
    Irrelevant,
}

/// Classifies raw inscription content (spec 4.4). Non-string JSON content
/// (a bare object, array, or number) is first re-serialized to its canonical
/// JSON text so the prefix/regex checks below see the same shape a plain
/// string body would have.
pub fn classify(content: &[u8]) -> Candidate {
    let text = to_matchable_text(content);

    if text.starts_with(DEPLOY_PREFIX) {
        return match serde_json::from_str::<DeployContent>(&text) {
            Ok(deploy) => Candidate::Deploy(deploy),
            Err(_) => Candidate::Irrelevant,
        };
    }

    if let Some(rest) = text.strip_prefix(MINT_PREFIX) {
        let referenced_id = rest.split('"').next().unwrap_or(rest).to_string();
        return Candidate::Mint { referenced_id };
    }

    if let Some(captures) = BITMAP_PATTERN.captures(&text) {
        if let Ok(number) = captures[1].parse::<u64>() {
            return Candidate::Bitmap {
                number,
                content: text,
            };
        }
    }

    Candidate::Irrelevant
}

fn to_matchable_text(content: &[u8]) -> String {
    let raw = String::from_utf8_lossy(content);
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::String(_)) | Err(_) => raw.into_owned(),
        Ok(value) => value.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test]
    fn deploy_candidate_parses_full_schema() {
        let content = br#"{"p":"brc-420","op":"deploy","id":"abci0","name":"Test","max":"100","price":"0.001"}"#;
        match classify(content) {
            Candidate::Deploy(d) => {
                assert_eq!(d.p, "brc-420");
                assert_eq!(d.name, "Test");
            }
            other => panic!("expected deploy candidate, got {other:?}"),
        }
    }

    #[test]
    fn deploy_prefix_with_malformed_body_is_irrelevant() {
        let content = br#"{"p":"brc-420","op":"deploy", not json"#;
        assert_eq!(classify(content), Candidate::Irrelevant);
    }

    #[test]
    fn mint_candidate_extracts_id_up_to_quote() {
        let content = br#"/content/abc123i0""#;
        assert_eq!(
            classify(content),
            Candidate::Mint {
                referenced_id: "abc123i0".to_string()
            }
        );
    }

    #[test]
    fn mint_candidate_without_trailing_quote_takes_rest_of_string() {
        let content = b"/content/abc123i0";
        assert_eq!(
            classify(content),
            Candidate::Mint {
                referenced_id: "abc123i0".to_string()
            }
        );
    }

    #[test_case(b"840000.bitmap", 840_000 ; "plain number")]
    #[test_case(b"0.bitmap", 0 ; "zero")]
    fn bitmap_candidate_extracts_number(content: &[u8], expected: u64) {
        match classify(content) {
            Candidate::Bitmap { number, .. } => assert_eq!(number, expected),
            other => panic!("expected bitmap candidate, got {other:?}"),
        }
    }

    #[test]
    fn bitmap_like_text_with_deploy_prefix_is_classified_as_deploy() {
        let content = br#"{"p":"brc-420","op":"deploy","id":"abci0","name":"840000.bitmap","max":"1","price":"1"}"#;
        assert!(matches!(classify(content), Candidate::Deploy(_)));
    }

    #[test]
    fn unrelated_text_is_irrelevant() {
        assert_eq!(classify(b"hello world"), Candidate::Irrelevant);
    }

    #[test]
    fn non_string_json_is_reserialized_before_matching() {
        let content = br#"840000"#;
        assert_eq!(classify(content), Candidate::Irrelevant);
    }
}
