use std::collections::BTreeMap;

use http::header::InvalidHeaderValue;
use http::{HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use url::Url;

use crate::constants::{TMI_CLIENT_ID_HEADER, TMI_TIMEOUT, TMI_URN_CHATTERS};

/// Client for the (undocumented) TMI chatter listing endpoint
#[derive(Debug, Clone)]
pub struct Tmi {
    client: reqwest::Client,
    base_url: Url,
    client_id: HeaderValue,
}

impl Tmi {
    pub fn new(base_url: &str, client_id: &str) -> TmiResult<Self> {
        let client = reqwest::Client::builder().timeout(TMI_TIMEOUT).build()?;
        let client_id = HeaderValue::from_str(client_id)?;
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(TmiErr::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(Self {
            client,
            base_url,
            client_id,
        })
    }

    /// Fetches everyone currently in `channel`'s chat, keyed by lowercased login.
    ///
    /// Every call goes out to the network; nothing is cached between requests.
    #[instrument(skip(self))]
    pub async fn fetch_chatters(&self, channel: &str) -> TmiResult<BTreeMap<String, Viewer>> {
        let uri = self.chatters_url(channel)?;
        let res = self
            .client
            .get(uri)
            .header(TMI_CLIENT_ID_HEADER, self.client_id.clone())
            .send()
            .await?;

        if !res.status().is_success() {
            tracing::error!(code = %res.status(), "non-2xx response from chatter listing");
            return Err(TmiErr::UnexpectedStatus(res.status()));
        }

        let body = res.bytes().await?;
        let viewers = parse_chatters(&body)?;

        tracing::debug!(viewer_count = viewers.len(), "aggregated chatter list");
        Ok(viewers)
    }

    /// `channel` goes in as a single path segment, so `/`, `?` and `#` are escaped rather than
    /// reshaping the upstream URL
    fn chatters_url(&self, channel: &str) -> TmiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TmiErr::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(channel)
            .push(TMI_URN_CHATTERS);

        Ok(url)
    }
}

/// Parses a raw chatter listing body and flattens it into viewer records
pub fn parse_chatters(body: &[u8]) -> TmiResult<BTreeMap<String, Viewer>> {
    let listing: ChattersResponse = serde_json::from_slice(body)?;
    Ok(listing.chatters.aggregate())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChattersResponse {
    #[serde(default)]
    pub chatters: Chatters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Chatters {
    pub vips: Vec<String>,
    pub moderators: Vec<String>,
    pub staff: Vec<String>,
    pub admins: Vec<String>,
    pub global_mods: Vec<String>,
    pub viewers: Vec<String>,
}

impl Chatters {
    pub fn bucket(&self, role: ChatterRole) -> &[String] {
        match role {
            ChatterRole::Vip => &self.vips,
            ChatterRole::Moderator => &self.moderators,
            ChatterRole::Staff => &self.staff,
            ChatterRole::Admin => &self.admins,
            ChatterRole::GlobalMod => &self.global_mods,
            ChatterRole::Viewer => &self.viewers,
        }
    }

    /// Merges every role bucket into a single map keyed by lowercased name.
    ///
    /// Buckets are applied in [`ChatterRole::PRECEDENCE`] order and a later bucket replaces any
    /// earlier record for the same key outright.
    pub fn aggregate(&self) -> BTreeMap<String, Viewer> {
        let mut viewers = BTreeMap::new();

        for role in ChatterRole::PRECEDENCE {
            for name in self.bucket(role) {
                viewers.insert(name.to_lowercase(), Viewer::new(name, role));
            }
        }

        viewers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatterRole {
    Vip,
    Moderator,
    Staff,
    Admin,
    GlobalMod,
    Viewer,
}

impl ChatterRole {
    pub const PRECEDENCE: [ChatterRole; 6] = [
        ChatterRole::Vip,
        ChatterRole::Moderator,
        ChatterRole::Staff,
        ChatterRole::Admin,
        ChatterRole::GlobalMod,
        ChatterRole::Viewer,
    ];

    // NOTE:
    //  staff are deliberately *not* flagged as moderators even though admins and global mods
    //  are; this matches what the relay has always reported and is pending product confirmation
    pub fn is_mod(&self) -> bool {
        matches!(
            self,
            ChatterRole::Moderator | ChatterRole::Admin | ChatterRole::GlobalMod
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub name: String,
    pub in_chat: bool,
    /// The listing only includes people currently in chat, who we treat as followers.
    pub is_follower: bool,
    pub is_mod: bool,
}

impl Viewer {
    pub fn new(name: &str, role: ChatterRole) -> Self {
        Self {
            name: name.to_string(),
            in_chat: true,
            is_follower: true,
            is_mod: role.is_mod(),
        }
    }
}

pub type TmiResult<T> = core::result::Result<T, TmiErr>;

#[derive(Debug, Error)]
pub enum TmiErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("unexpected response status from chatter listing: {0}")]
    UnexpectedStatus(StatusCode),

    #[error("malformed chatter listing: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("while creating a HeaderValue ({0})")]
    HeaderError(#[from] InvalidHeaderValue),

    #[error("invalid chatter listing base url: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("chatter listing base url cannot take path segments: {0}")]
    InvalidBaseUrl(String),
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_role_flags() {
        let chatters = Chatters {
            vips: vec!["Vippy".into()],
            moderators: vec!["modder".into()],
            staff: vec!["staffer".into()],
            admins: vec!["admin".into()],
            global_mods: vec!["gmod".into()],
            viewers: vec!["lurker".into()],
        };

        let viewers = chatters.aggregate();
        assert_eq!(viewers.len(), 6);

        let is_mod = |key: &str| viewers[key].is_mod;
        assert!(!is_mod("vippy"));
        assert!(is_mod("modder"));
        assert!(!is_mod("staffer"));
        assert!(is_mod("admin"));
        assert!(is_mod("gmod"));
        assert!(!is_mod("lurker"));

        assert!(viewers.values().all(|v| v.in_chat && v.is_follower));
        assert_eq!(viewers["vippy"].name, "Vippy");
    }

    #[test]
    fn test_later_bucket_wins() {
        let body = json!({
            "chatters": {
                "moderators": ["SomeUser"],
                "viewers": ["someuser"],
            }
        });

        let viewers = parse_chatters(body.to_string().as_bytes()).unwrap();
        assert_eq!(viewers.len(), 1);
        assert_eq!(
            viewers["someuser"],
            Viewer {
                name: "someuser".into(),
                in_chat: true,
                is_follower: true,
                is_mod: false,
            }
        );

        let body = json!({
            "chatters": {
                "vips": ["PLSS"],
                "global_mods": ["plss"],
            }
        });

        let viewers = parse_chatters(body.to_string().as_bytes()).unwrap();
        assert_eq!(viewers.len(), 1);
        assert!(viewers["plss"].is_mod);
        assert_eq!(viewers["plss"].name, "plss");
    }

    #[test]
    fn test_empty_listing() {
        assert!(parse_chatters(br#"{"chatters":{}}"#).unwrap().is_empty());
        assert!(parse_chatters(b"{}").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_listing() {
        assert!(matches!(
            parse_chatters(b"<html>bad gateway</html>"),
            Err(TmiErr::SerdeError(_))
        ));
        assert!(matches!(
            parse_chatters(br#"{"chatters":{"viewers":"nope"}}"#),
            Err(TmiErr::SerdeError(_))
        ));
    }

    #[test]
    fn test_viewer_serializes_camel_case() {
        let viewer = Viewer::new("Chikogaki", ChatterRole::Moderator);
        assert_eq!(
            serde_json::to_value(&viewer).unwrap(),
            json!({
                "name": "Chikogaki",
                "inChat": true,
                "isFollower": true,
                "isMod": true,
            })
        );
    }

    #[tokio::test]
    async fn test_fetch_chatters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/group/user/plss/chatters"))
            .and(header("Client-ID", "test-client-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chatter_count": 3,
                "chatters": {
                    "broadcaster": ["plss"],
                    "moderators": ["nightbot"],
                    "viewers": ["Lurker", "another"],
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tmi = Tmi::new(&format!("{}/group/user/", server.uri()), "test-client-id").unwrap();
        let viewers = tmi.fetch_chatters("plss").await.unwrap();

        assert_eq!(
            viewers.keys().collect::<Vec<_>>(),
            vec!["another", "lurker", "nightbot"]
        );
        assert_eq!(viewers["lurker"].name, "Lurker");
    }

    #[tokio::test]
    async fn test_fetch_chatters_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "chatters": {} })))
            .mount(&server)
            .await;

        let tmi = Tmi::new(&format!("{}/group/user/", server.uri()), "test-client-id").unwrap();
        let err = tmi.fetch_chatters("plss").await.unwrap_err();

        assert!(matches!(
            err,
            TmiErr::UnexpectedStatus(StatusCode::SERVICE_UNAVAILABLE)
        ));
    }

    #[tokio::test]
    async fn test_fetch_chatters_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "chatters": {} }))
                    .set_delay(TMI_TIMEOUT * 3),
            )
            .mount(&server)
            .await;

        let tmi = Tmi::new(&format!("{}/group/user/", server.uri()), "test-client-id").unwrap();
        let err = tmi.fetch_chatters("plss").await.unwrap_err();

        assert!(matches!(err, TmiErr::ReqwestError(ref e) if e.is_timeout()));
    }

    #[tokio::test]
    async fn test_channel_stays_in_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "chatters": {} })))
            .expect(3)
            .mount(&server)
            .await;

        let tmi = Tmi::new(&format!("{}/group/user/", server.uri()), "test-client-id").unwrap();
        for channel in ["victim?x=1", "victim/../../admin", "victim#frag"] {
            tmi.fetch_chatters(channel).await.unwrap();
        }

        let requests = server.received_requests().await.unwrap();
        let paths = requests.iter().map(|r| r.url.path()).collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                "/group/user/victim%3Fx=1/chatters",
                "/group/user/victim%2F..%2F..%2Fadmin/chatters",
                "/group/user/victim%23frag/chatters",
            ]
        );
        assert!(requests.iter().all(|r| r.url.query().is_none()));
    }

    #[test]
    fn test_chatters_url_without_trailing_slash() {
        let tmi = Tmi::new("http://localhost:9000/group/user", "test-client-id").unwrap();
        assert_eq!(
            tmi.chatters_url("plss").unwrap().as_str(),
            "http://localhost:9000/group/user/plss/chatters"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            Tmi::new("not a url", "test-client-id"),
            Err(TmiErr::UrlError(_))
        ));
        assert!(matches!(
            Tmi::new("mailto:someone@example.com", "test-client-id"),
            Err(TmiErr::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_invalid_client_id() {
        assert!(matches!(
            Tmi::new("http://localhost/", "bad\nid"),
            Err(TmiErr::HeaderError(_))
        ));
    }
}
