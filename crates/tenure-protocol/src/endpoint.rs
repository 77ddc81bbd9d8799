//! The real-time channel endpoint: `/ws/{account}?token={bearer}`.

use crate::ProtocolError;

/// Path prefix of the channel endpoint.
const CHANNEL_PREFIX: &str = "/ws/";

/// What a client asked for when it opened a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// The account named in the path.
    pub account: String,
    /// The bearer token from the `token` query parameter. `None` when the
    /// parameter is absent or empty.
    pub token: Option<String>,
}

impl ChannelRequest {
    /// Parses a request target such as `/ws/alice?token=eyJ...`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] when the path isn't under
    /// `/ws/`, names no account, or isn't valid percent-encoding.
    pub fn parse(target: &str) -> Result<Self, ProtocolError> {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        let raw_account = path.strip_prefix(CHANNEL_PREFIX).ok_or_else(|| {
            ProtocolError::InvalidMessage(format!("not a channel endpoint: {path}"))
        })?;
        if raw_account.is_empty() || raw_account.contains('/') {
            return Err(ProtocolError::InvalidMessage(format!(
                "channel path must name exactly one account: {path}"
            )));
        }
        let account = decode(raw_account)?;

        let mut token = None;
        for pair in query.unwrap_or_default().split('&') {
            if let Some(("token", value)) = pair.split_once('=') {
                if !value.is_empty() {
                    token = Some(decode(value)?);
                }
            }
        }

        Ok(Self { account, token })
    }
}

fn decode(raw: &str) -> Result<String, ProtocolError> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| ProtocolError::InvalidMessage(format!("bad percent-encoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_account_and_token() {
        let req = ChannelRequest::parse("/ws/alice?token=a.b.c").unwrap();
        assert_eq!(req.account, "alice");
        assert_eq!(req.token.as_deref(), Some("a.b.c"));
    }

    #[test]
    fn test_parse_without_query_has_no_token() {
        let req = ChannelRequest::parse("/ws/alice").unwrap();
        assert_eq!(req.token, None);
    }

    #[test]
    fn test_parse_empty_token_counts_as_missing() {
        let req = ChannelRequest::parse("/ws/alice?token=&x=1").unwrap();
        assert_eq!(req.token, None);
    }

    #[test]
    fn test_parse_token_among_other_parameters() {
        let req = ChannelRequest::parse("/ws/alice?v=2&token=t0k").unwrap();
        assert_eq!(req.token.as_deref(), Some("t0k"));
    }

    #[test]
    fn test_parse_decodes_percent_encoded_account() {
        let req = ChannelRequest::parse("/ws/j%C3%BCrgen?token=t").unwrap();
        assert_eq!(req.account, "jürgen");
    }

    #[test]
    fn test_parse_rejects_foreign_path() {
        assert!(matches!(
            ChannelRequest::parse("/api/alice?token=t"),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_or_nested_account() {
        assert!(ChannelRequest::parse("/ws/").is_err());
        assert!(ChannelRequest::parse("/ws/a/b").is_err());
    }
}
