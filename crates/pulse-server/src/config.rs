/// Mount points for the broker's two routes.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Stream endpoint prefix. Normalized to end with `/`.
    pub endpoint: String,
    /// Path serving the embedded browser client. Normalized to end with `/`.
    pub script: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "/sse/".to_string(),
            script: "/sse.js/".to_string(),
        }
    }
}

impl BrokerConfig {
    pub(crate) fn normalized(mut self) -> Self {
        self.endpoint = ensure_trailing_slash(&self.endpoint);
        self.script = ensure_trailing_slash(&self.script);
        self
    }
}

/// Append a trailing slash to the path portion of a URL. The query
/// string, if any, is preserved untouched.
pub fn ensure_trailing_slash(url: &str) -> String {
    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (url, None),
    };
    let path = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    };
    match query {
        Some(q) => format!("{path}?{q}"),
        None => path,
    }
}
