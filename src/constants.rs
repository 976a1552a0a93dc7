use std::time::Duration;

pub const SERVER_PORT: u16 = 3000;

pub const TMI_BASE_URL: &str = "http://tmi.twitch.tv/group/user/";
pub const TMI_URN_CHATTERS: &str = "chatters";
pub const TMI_CLIENT_ID_HEADER: &str = "Client-ID";

// the listing endpoint is undocumented and occasionally hangs
pub const TMI_TIMEOUT: Duration = Duration::from_secs(1);

pub const HELIX_URI_BASE: &str = "https://api.twitch.tv/helix";
pub const HELIX_CLIENT_ID_HEADER: &str = "client-id";
pub const HELIX_MAX_ATTEMPTS: usize = 3;
pub const HELIX_CHUNK_SIZE: usize = 100;

pub const RATELIMIT_REMAINING_HEADER: &str = "ratelimit-remaining";
pub const RATELIMIT_RESET_HEADER: &str = "ratelimit-reset";

pub const API_SERVICE_NAME: &str = "tmi-relay";
pub const API_TRACER_NAME: &str = "tmi-relay-tracer";

pub const STATUS_OK: u16 = 200;
pub const STATUS_FAILURE: u16 = 500;
