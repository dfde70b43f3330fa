use std::fmt::Debug;

/// TLS credentials for one of the compiled-in backends.
#[derive(Clone)]
pub enum TlsConfig {
    #[cfg(feature = "native-tls-backend")]
    NativeTls(native_tls::Identity),

    #[cfg(feature = "rustls-backend")]
    Rustls(std::sync::Arc<rustls::ServerConfig>),
}

impl Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "native-tls-backend")]
            Self::NativeTls(_) => f.debug_tuple("NativeTls").finish(),
            #[cfg(feature = "rustls-backend")]
            Self::Rustls(_) => f.debug_tuple("Rustls").finish(),
        }
    }
}

/// How the server engages TLS.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// No TLS support at all.
    Disabled,

    /// STARTTLS is offered, plaintext transactions stay allowed.
    #[cfg(any(feature = "native-tls-backend", feature = "rustls-backend"))]
    Explicit(TlsConfig),

    /// STARTTLS is offered and MAIL and later transactional commands are
    /// refused until the channel is encrypted.
    #[cfg(any(feature = "native-tls-backend", feature = "rustls-backend"))]
    Required(TlsConfig),

    /// The handshake runs immediately on accept, as on an SMTPS port.
    #[cfg(any(feature = "native-tls-backend", feature = "rustls-backend"))]
    Implicit(TlsConfig),
}

impl TlsMode {
    /// Whether this mode involves TLS at all.
    pub fn has_tls(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// The credentials, for any mode that carries them.
    pub fn config(&self) -> Option<&TlsConfig> {
        match self {
            Self::Disabled => None,
            #[cfg(any(feature = "native-tls-backend", feature = "rustls-backend"))]
            Self::Explicit(cfg) | Self::Required(cfg) | Self::Implicit(cfg) => Some(cfg),
        }
    }

    /// Whether the server handshakes before the banner.
    pub fn is_direct_tls(&self) -> bool {
        match self {
            #[cfg(any(feature = "native-tls-backend", feature = "rustls-backend"))]
            Self::Implicit(_) => true,
            _ => false,
        }
    }

    /// Whether the client may upgrade with STARTTLS.
    pub fn allows_starttls(&self) -> bool {
        match self {
            #[cfg(any(feature = "native-tls-backend", feature = "rustls-backend"))]
            Self::Explicit(_) | Self::Required(_) => true,
            _ => false,
        }
    }

    /// Whether transactional commands demand an encrypted channel.
    pub fn tls_mandatory(&self) -> bool {
        match self {
            #[cfg(any(feature = "native-tls-backend", feature = "rustls-backend"))]
            Self::Required(_) => true,
            _ => false,
        }
    }
}

/// Negotiated parameters of an established TLS channel, recorded on the
/// peer and echoed into the Received header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsState {
    pub version: String,
    pub cipher: String,
}
