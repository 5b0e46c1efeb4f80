//! Inbound → upstream header forwarding policy

use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CACHE_CONTROL};

/// Headers that may travel from an inbound request to an upstream server.
///
/// Anything not on the list is dropped, so no other client header reaches a
/// third party.
#[derive(Debug, Clone)]
pub struct HeaderAllowList {
    names: Vec<HeaderName>,
}

impl HeaderAllowList {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_ref().trim().as_bytes()).map_err(|e| {
                    Error::InvalidHeader(format!("{:?}: {e}", name.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { names })
    }

    pub fn names(&self) -> &[HeaderName] {
        &self.names
    }

    pub fn allows(&self, name: &HeaderName) -> bool {
        self.names.contains(name)
    }

    /// Copy only the allow-listed headers out of `inbound`.
    pub fn forward(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut forwarded = HeaderMap::new();
        for name in &self.names {
            for value in inbound.get_all(name) {
                forwarded.append(name.clone(), value.clone());
            }
        }
        forwarded
    }
}

impl Default for HeaderAllowList {
    fn default() -> Self {
        Self {
            names: vec![AUTHORIZATION, CACHE_CONTROL],
        }
    }
}

/// `Authorization: Bearer <token>` value, or `None` for tokens that are not
/// valid header text.
pub fn bearer(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {token}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_only_allow_listed_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        inbound.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        inbound.insert("cookie", HeaderValue::from_static("session=secret"));
        inbound.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        let forwarded = HeaderAllowList::default().forward(&inbound);

        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded.get(AUTHORIZATION).unwrap(), "Bearer t");
        assert_eq!(forwarded.get(CACHE_CONTROL).unwrap(), "no-cache");
        assert!(forwarded.get("cookie").is_none());
    }

    #[test]
    fn custom_list_is_case_insensitive() {
        let list = HeaderAllowList::new(["Authorization", "X-Trace"]).unwrap();
        let mut inbound = HeaderMap::new();
        inbound.insert("x-trace", HeaderValue::from_static("1"));
        inbound.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let forwarded = list.forward(&inbound);
        assert_eq!(forwarded.len(), 1);
        assert!(list.allows(&AUTHORIZATION));
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(HeaderAllowList::new(["bad header"]).is_err());
    }

    #[test]
    fn bearer_value() {
        assert_eq!(bearer("abc").unwrap(), "Bearer abc");
        assert!(bearer("bad\ntoken").is_none());
    }
}
