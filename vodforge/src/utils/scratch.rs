//! Session scratch directory naming.
//!
//! In-flight sessions encode under `<base>/<container>_<provider>_<id>/`.
//! The name embeds enough to re-associate a directory with its session
//! after a crash, which is what the cleanup orphan sweep relies on.

use std::str::FromStr;

use crate::domain::{Container, ProviderKind};

/// Build the scratch directory name for a session.
pub fn scratch_dir_name(container: Container, provider: ProviderKind, session_id: &str) -> String {
    format!("{}_{}_{}", container.as_str(), provider.as_str(), session_id)
}

/// Parse a scratch directory name back into its parts.
///
/// Returns `None` for names that are not session scratch directories
/// (`content`, `metadata`, log dirs and anything else under the base).
pub fn parse_scratch_dir_name(name: &str) -> Option<(Container, ProviderKind, String)> {
    let (container_str, rest) = name.split_once('_')?;
    let container = Container::from_str(container_str).ok()?;

    // Provider names themselves contain underscores, so match greedily
    // against the known set.
    for provider in ProviderKind::all() {
        if let Some(session_id) = rest.strip_prefix(provider.as_str())
            && let Some(session_id) = session_id.strip_prefix('_')
            && !session_id.is_empty()
        {
            return Some((container, provider, session_id.to_string()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for container in [Container::Mp4, Container::Mkv, Container::Dash, Container::Hls] {
            for provider in ProviderKind::all() {
                let name = scratch_dir_name(container, provider, "abc-123");
                let (c, p, id) = parse_scratch_dir_name(&name).unwrap();
                assert_eq!(c, container);
                assert_eq!(p, provider);
                assert_eq!(id, "abc-123");
            }
        }
    }

    #[test]
    fn test_rejects_non_scratch_names() {
        assert!(parse_scratch_dir_name("content").is_none());
        assert!(parse_scratch_dir_name("metadata").is_none());
        assert!(parse_scratch_dir_name("logs").is_none());
        assert!(parse_scratch_dir_name("dash_pipeline_").is_none());
        assert!(parse_scratch_dir_name("avi_software_encoder_x").is_none());
    }

    #[test]
    fn test_session_id_with_underscores() {
        let (_, _, id) = parse_scratch_dir_name("dash_pipeline_a_b_c").unwrap();
        assert_eq!(id, "a_b_c");
    }
}
