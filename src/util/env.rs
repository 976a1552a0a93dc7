//! Process configuration, deserialized from the environment.
//!
//! Variables are mapped onto [`Env`] with serde, so defaults and renames can be declared with the
//! usual derive attributes instead of a hand-written lookup per variable. A `.env` file in the
//! working directory is loaded first, if one exists.

use std::iter::empty;
use std::sync::LazyLock;

use serde::Deserialize;
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, IntoDeserializer};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::constants::{
    API_SERVICE_NAME, API_TRACER_NAME, HELIX_URI_BASE, SERVER_PORT, TMI_BASE_URL,
};

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);

/// Returns the process-wide configuration, reading it on first use.
pub async fn get_env() -> EnvResult<&'static Env> {
    ENV_VARS.get_or_try_init(|| async { Env::new() }).await
}

pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    get_env().await?.get(var)
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    pub client_id: String,

    #[serde(default = "default_port")]
    pub server_api_port: u16,
    #[serde(default = "default_tmi_base_url")]
    pub tmi_base_url: String,
    #[serde(default = "default_helix_base_url")]
    pub helix_base_url: String,
    #[serde(default)]
    pub helix_app_token: Option<String>,

    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub api_service_name: String,
    #[serde(default = "default_tracer_name")]
    pub api_tracer_name: String,
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(e.into());
        }

        Ok(from_iter(dotenvy::vars())?)
    }

    /// Looks up a single string-valued variable.
    ///
    /// Optional variables that are unset (or set to an empty string) produce [`EnvErr::Unset`].
    pub fn get(&self, var: Var) -> EnvResult<&str> {
        match var {
            Var::ClientId => Ok(&self.client_id),
            Var::TmiBaseUrl => Ok(&self.tmi_base_url),
            Var::HelixBaseUrl => Ok(&self.helix_base_url),
            Var::HelixAppToken => optional(&self.helix_app_token, var),
            Var::OtelExporterEndpoint => optional(&self.otel_exporter_otlp_endpoint, var),
            Var::ApiServiceName => Ok(&self.api_service_name),
            Var::ApiTracerName => Ok(&self.api_tracer_name),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Var {
    ClientId,
    TmiBaseUrl,
    HelixBaseUrl,
    HelixAppToken,
    OtelExporterEndpoint,
    ApiServiceName,
    ApiTracerName,
}

impl Var {
    pub fn name(&self) -> &'static str {
        match self {
            Var::ClientId => "CLIENT_ID",
            Var::TmiBaseUrl => "TMI_BASE_URL",
            Var::HelixBaseUrl => "HELIX_BASE_URL",
            Var::HelixAppToken => "HELIX_APP_TOKEN",
            Var::OtelExporterEndpoint => "OTEL_EXPORTER_OTLP_ENDPOINT",
            Var::ApiServiceName => "API_SERVICE_NAME",
            Var::ApiTracerName => "API_TRACER_NAME",
        }
    }
}

fn optional(val: &Option<String>, var: Var) -> EnvResult<&str> {
    val.as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(EnvErr::Unset(var.name()))
}

fn default_port() -> u16 {
    SERVER_PORT
}

fn default_tmi_base_url() -> String {
    TMI_BASE_URL.to_string()
}

fn default_helix_base_url() -> String {
    HELIX_URI_BASE.to_string()
}

fn default_service_name() -> String {
    API_SERVICE_NAME.to_string()
}

fn default_tracer_name() -> String {
    API_TRACER_NAME.to_string()
}

// ---
//  Deserializer implementation
// ---

/// A single variable's value, carrying its key for error reporting
struct Value {
    key: String,
    raw: String,
}

struct Key(String);

struct Vars<Iter> {
    inner: Iter,
}

impl<Iter: Iterator<Item = (String, String)>> Iterator for Vars<Iter> {
    type Item = (Key, Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(key, raw)| (Key(key.clone()), Value { key, raw }))
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Value {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Key {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! forward_parsed_values {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.raw.parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(de::Error::custom(format_args!(
                        "{}: while parsing '{}' (variable: {})",
                        e, self.raw, self.key
                    ))),
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Value {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.raw.into_deserializer().deserialize_any(visitor)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.raw.is_empty() {
            return SeqDeserializer::new(empty::<Value>()).deserialize_seq(visitor);
        }

        let key = self.key;
        let values = self.raw.split(',').map(|v| Value {
            key: key.clone(),
            raw: v.trim().to_owned(),
        });

        SeqDeserializer::new(values).deserialize_seq(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _: &'static str,
        _: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_enum(self.raw.into_deserializer())
    }

    forward_parsed_values! {
        bool => deserialize_bool,
        u8 => deserialize_u8,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i8 => deserialize_i8,
        i16 => deserialize_i16,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
        f32 => deserialize_f32,
        f64 => deserialize_f64,
    }

    serde::forward_to_deserialize_any! {
        char str string unit bytes byte_buf map
        unit_struct tuple_struct identifier tuple
        ignored_any struct
    }
}

impl<'de> de::Deserializer<'de> for Key {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.0.into_deserializer().deserialize_any(visitor)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map newtype_struct
        unit_struct tuple_struct identifier tuple ignored_any
        bool u8 u16 u32 u64 i8 i16 i32 i64 f32 f64 enum struct
    }
}

struct Deserializer<'de, Iter: Iterator<Item = (String, String)>> {
    inner: MapDeserializer<'de, Vars<Iter>, EnvDeserializeError>,
}

impl<'de, Iter: Iterator<Item = (String, String)>> de::Deserializer<'de>
    for Deserializer<'de, Iter>
{
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_map(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_map(self.inner)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf
        newtype_struct unit_struct tuple_struct identifier
        tuple ignored_any bool u8 u16 u32 u64 i8 i16 i32 i64
        f32 f64 enum struct
    }
}

/// Deserializes `T` from an arbitrary set of `(key, value)` pairs
pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    T::deserialize(Deserializer {
        inner: MapDeserializer::new(Vars {
            inner: iter.into_iter(),
        }),
    })
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.into())
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),

    #[error("environment variable '{0}' is not set")]
    Unset(&'static str),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing required environment variable '{0}'")]
    MissingValue(String),
}

#[cfg(test)]
mod test {
    use super::*;

    fn pairs(vars: &[(&str, &str)]) -> Vec<(String, String)> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_applied() {
        let env: Env = from_iter(pairs(&[("CLIENT_ID", "abc123"), ("PATH", "/usr/bin")])).unwrap();

        assert_eq!(env.client_id, "abc123");
        assert_eq!(env.server_api_port, SERVER_PORT);
        assert_eq!(env.tmi_base_url, TMI_BASE_URL);
        assert_eq!(env.helix_base_url, HELIX_URI_BASE);
        assert!(env.helix_app_token.is_none());
        assert!(env.otel_exporter_otlp_endpoint.is_none());
        assert_eq!(env.api_service_name, API_SERVICE_NAME);
    }

    #[test]
    fn test_overrides_parsed() {
        let env: Env = from_iter(pairs(&[
            ("CLIENT_ID", "abc123"),
            ("SERVER_API_PORT", "8080"),
            ("TMI_BASE_URL", "http://localhost:9000/group/user/"),
            ("HELIX_APP_TOKEN", "token"),
        ]))
        .unwrap();

        assert_eq!(env.server_api_port, 8080);
        assert_eq!(env.tmi_base_url, "http://localhost:9000/group/user/");
        assert_eq!(env.get(Var::HelixAppToken).unwrap(), "token");
    }

    #[test]
    fn test_missing_client_id() {
        let err = from_iter::<_, Env>(pairs(&[("SERVER_API_PORT", "8080")])).unwrap_err();
        assert!(matches!(err, EnvDeserializeError::MissingValue(ref f) if f == "CLIENT_ID"));
    }

    #[test]
    fn test_bad_port_names_variable() {
        let err = from_iter::<_, Env>(pairs(&[
            ("CLIENT_ID", "abc123"),
            ("SERVER_API_PORT", "not-a-port"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("SERVER_API_PORT"));
    }

    #[test]
    fn test_unset_optional_var() {
        let env: Env = from_iter(pairs(&[
            ("CLIENT_ID", "abc123"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", ""),
        ]))
        .unwrap();

        assert_eq!(env.get(Var::ClientId).unwrap(), "abc123");
        assert!(matches!(
            env.get(Var::OtelExporterEndpoint),
            Err(EnvErr::Unset("OTEL_EXPORTER_OTLP_ENDPOINT"))
        ));
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    struct ListConfig {
        channels: Vec<String>,
    }

    #[test]
    fn test_comma_separated_seq() {
        let cfg: ListConfig = from_iter(pairs(&[("CHANNELS", "plss, vacu0usly,lcolonq")])).unwrap();
        assert_eq!(cfg.channels, vec!["plss", "vacu0usly", "lcolonq"]);
    }
}
