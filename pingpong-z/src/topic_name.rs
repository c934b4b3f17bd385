// Channel name qualification and key expression mapping

/// Errors that can occur while resolving a channel name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicNameError {
    Empty,
    RootOnly,
    EmptyComponent,
    InvalidComponent(String),
    InvalidNamespace(String),
    InvalidNodeName(String),
}

impl std::fmt::Display for TopicNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "channel name is empty"),
            Self::RootOnly => write!(f, "channel name cannot be just '/'"),
            Self::EmptyComponent => write!(f, "name contains repeated '/'"),
            Self::InvalidComponent(s) => write!(f, "invalid component '{}'", s),
            Self::InvalidNamespace(s) => write!(f, "invalid namespace: {}", s),
            Self::InvalidNodeName(s) => write!(f, "invalid node name '{}'", s),
        }
    }
}

impl std::error::Error for TopicNameError {}

/// A component must start with a letter or underscore, followed by
/// alphanumerics or underscores.
fn is_valid_component(component: &str) -> bool {
    let mut bytes = component.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// `path` carries no leading or trailing slash; every part must be
/// non-empty.
fn validate_components(path: &str) -> Result<(), TopicNameError> {
    path.split('/').try_for_each(|part| {
        if part.is_empty() {
            Err(TopicNameError::EmptyComponent)
        } else if is_valid_component(part) {
            Ok(())
        } else {
            Err(TopicNameError::InvalidComponent(part.to_string()))
        }
    })
}

/// Validate a node name.
pub fn validate_node_name(node_name: &str) -> Result<(), TopicNameError> {
    if is_valid_component(node_name) {
        Ok(())
    } else {
        Err(TopicNameError::InvalidNodeName(node_name.to_string()))
    }
}

/// Validate a namespace: empty, "/", or slash separated components without a
/// trailing slash.
pub fn validate_namespace(namespace: &str) -> Result<(), TopicNameError> {
    if namespace.is_empty() || namespace == "/" {
        return Ok(());
    }
    if namespace.ends_with('/') {
        return Err(TopicNameError::InvalidNamespace(
            "namespace cannot end with '/'".to_string(),
        ));
    }
    let inner = namespace.strip_prefix('/').unwrap_or(namespace);
    validate_components(inner).map_err(|e| TopicNameError::InvalidNamespace(e.to_string()))
}

/// Resolve a channel name against a node's namespace and name.
///
/// - `/a/b` is absolute and kept (a trailing slash is dropped)
/// - `~/a` is private and expands to `<namespace>/<node>/a`
/// - `a/b` is relative and expands to `<namespace>/a/b`
///
/// ```
/// use pingpong_z::topic_name::qualify_channel_name;
///
/// assert_eq!(qualify_channel_name("/microROS/pub", "/ns", "node").unwrap(), "/microROS/pub");
/// assert_eq!(qualify_channel_name("ping", "/ns", "node").unwrap(), "/ns/ping");
/// assert_eq!(qualify_channel_name("~/ping", "", "node").unwrap(), "/node/ping");
/// ```
pub fn qualify_channel_name(
    channel: &str,
    namespace: &str,
    node_name: &str,
) -> Result<String, TopicNameError> {
    if channel.is_empty() {
        return Err(TopicNameError::Empty);
    }
    validate_namespace(namespace)?;
    validate_node_name(node_name)?;

    let namespace = namespace.strip_suffix('/').unwrap_or(namespace);

    if let Some(absolute) = channel.strip_prefix('/') {
        let absolute = absolute.strip_suffix('/').unwrap_or(absolute);
        if absolute.is_empty() {
            return Err(TopicNameError::RootOnly);
        }
        validate_components(absolute)?;
        return Ok(format!("/{absolute}"));
    }

    if let Some(private) = channel.strip_prefix('~') {
        let private = private.strip_prefix('/').unwrap_or(private);
        let private = private.strip_suffix('/').unwrap_or(private);
        if !private.is_empty() {
            validate_components(private)?;
        }
        return Ok(match private.is_empty() {
            true => format!("{namespace}/{node_name}"),
            false => format!("{namespace}/{node_name}/{private}"),
        });
    }

    let relative = channel.strip_suffix('/').unwrap_or(channel);
    validate_components(relative)?;
    Ok(format!("{namespace}/{relative}"))
}

/// Map a qualified channel name to a zenoh key expression string.
///
/// Format: `<domain_id>/<channel>` where inner slashes are mangled to `%` so
/// the channel occupies a single chunk.
pub fn channel_key_expr(domain_id: usize, qualified: &str) -> String {
    let channel = qualified.trim_matches('/');
    format!("{domain_id}/{}", channel.replace('/', "%"))
}
