#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how session records are laid out in the store.
pub struct SessionStoreConfig {
    /// The namespace prepended to every session key, to keep session
    /// records apart from other data living in the same store.
    ///
    /// A `:` delimiter is appended if the prefix is non-empty and doesn't
    /// already end with one.
    ///
    /// By default, there is no prefix.
    #[serde(default)]
    pub key_prefix: String,
    /// The time-to-live of session records.
    ///
    /// It is refreshed every time the session is saved.
    /// It is also used as the default `Max-Age` of the session cookie.
    ///
    /// By default, records never expire.
    #[serde(default, with = "humantime_serde")]
    pub ttl: Option<std::time::Duration>,
}
