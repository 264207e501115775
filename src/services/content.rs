//! Validation and normalization of submitted track references.

use crate::error::Rejection;

const TRACK_ID_LENGTH: usize = 22;
const URI_PREFIX: &str = "spotify:track:";
const WEB_HOST: &str = "https://open.spotify.com/";

/// A validated track reference together with its canonical duplicate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContent {
    /// Canonical `spotify:track:<id>` form, stored and used for duplicate detection.
    pub key: String,
    /// Reference as provided by the submitter, trimmed.
    pub reference: String,
}

/// Accepts `spotify:track:<id>`, `https://open.spotify.com[/intl-xx]/track/<id>[?query]`
/// and a bare track id.
pub fn normalize(input: &str) -> Result<NormalizedContent, Rejection> {
    let reference = input.trim();
    let id = extract_track_id(reference).ok_or_else(|| {
        Rejection::InvalidInput(format!(
            "`{reference}` is not a valid track link, URI or id"
        ))
    })?;

    Ok(NormalizedContent {
        key: format!("{URI_PREFIX}{id}"),
        reference: reference.to_owned(),
    })
}

fn extract_track_id(reference: &str) -> Option<&str> {
    let candidate = if let Some(id) = reference.strip_prefix(URI_PREFIX) {
        id
    } else if let Some(path) = reference.strip_prefix(WEB_HOST) {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let path = match path.split_once('/') {
            Some((locale, rest)) if locale.starts_with("intl-") => rest,
            _ => path,
        };
        path.strip_prefix("track/")?
    } else {
        reference
    };

    is_track_id(candidate).then_some(candidate)
}

fn is_track_id(candidate: &str) -> bool {
    candidate.len() == TRACK_ID_LENGTH && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "4uLU6hMCjMI75M1A2tKUQC";

    #[test]
    fn accepts_known_forms() {
        let inputs = [
            format!("spotify:track:{ID}"),
            format!("https://open.spotify.com/track/{ID}"),
            format!("https://open.spotify.com/track/{ID}?si=abc123"),
            format!("https://open.spotify.com/intl-fr/track/{ID}"),
            format!("  {ID}  "),
        ];

        for input in inputs {
            let normalized = normalize(&input).unwrap();
            assert_eq!(normalized.key, format!("spotify:track:{ID}"), "{input}");
        }
    }

    #[test]
    fn keeps_the_submitted_reference() {
        let link = format!("https://open.spotify.com/track/{ID}?si=abc123");
        assert_eq!(normalize(&link).unwrap().reference, link);
    }

    #[test]
    fn rejects_other_inputs() {
        let inputs = [
            "",
            "not a track",
            "spotify:album:4uLU6hMCjMI75M1A2tKUQC",
            "https://open.spotify.com/album/4uLU6hMCjMI75M1A2tKUQC",
            "https://example.com/track/4uLU6hMCjMI75M1A2tKUQC",
            "4uLU6hMCjMI75M1A2tKUQ",
            "4uLU6hMCjMI75M1A2tKU-C",
        ];

        for input in inputs {
            assert!(
                matches!(normalize(input), Err(Rejection::InvalidInput(_))),
                "{input}"
            );
        }
    }
}
