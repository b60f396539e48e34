use url::{Host, Url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }
}

/// A validated `ws://` or `wss://` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub scheme: Scheme,
    /// Host as passed to the resolver (IPv6 literals without brackets).
    pub host: String,
    pub port: u16,
    pub path_and_query: String,
}

impl WsUrl {
    /// Value of the `Host` request header. The port is omitted when it is the
    /// scheme default.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum UrlError {
    #[error("address is empty")]
    Empty,
    #[error("URL must start with ws:// or wss://")]
    Scheme,
    #[error("URL has no host")]
    Host,
    #[error("invalid port")]
    Port,
    #[error(transparent)]
    Parse(url::ParseError),
}

pub fn parse_ws_or_wss(input: &str) -> Result<WsUrl, UrlError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = Url::parse(input).map_err(|e| match e {
        url::ParseError::InvalidPort => UrlError::Port,
        url::ParseError::EmptyHost => UrlError::Host,
        url::ParseError::RelativeUrlWithoutBase => UrlError::Scheme,
        other => UrlError::Parse(other),
    })?;

    let scheme = match parsed.scheme() {
        "ws" => Scheme::Ws,
        "wss" => Scheme::Wss,
        _ => return Err(UrlError::Scheme),
    };

    let host = match parsed.host() {
        Some(Host::Domain(d)) if !d.is_empty() => d.to_owned(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => return Err(UrlError::Host),
    };

    let mut path_and_query = parsed.path().to_owned();
    if let Some(query) = parsed.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    Ok(WsUrl {
        scheme,
        host,
        port: parsed.port().unwrap_or(scheme.default_port()),
        path_and_query,
    })
}
