use crate::error::{Error, Result};
use std::time::Duration;

const DEFAULT_IO_THREAD_NAME: &str = "colbridge-io";

/// Options used to create a connection instance.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub(crate) conn_str: String,
    pub(crate) credential: Credential,
    pub(crate) timeouts: TimeoutOptions,
    pub(crate) security: SecurityOptions,
    pub(crate) io_thread_name: String,
}

impl ClusterOptions {
    #[inline]
    pub fn new(conn_str: impl Into<String>) -> Self {
        ClusterOptions {
            conn_str: conn_str.into(),
            credential: Credential::default(),
            timeouts: TimeoutOptions::default(),
            // only Capella CA is trusted unless security options are given.
            security: SecurityOptions {
                trust_only_capella: true,
                ..Default::default()
            },
            io_thread_name: String::from(DEFAULT_IO_THREAD_NAME),
        }
    }

    #[inline]
    pub fn credential(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credential = Credential {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    #[inline]
    pub fn timeouts(mut self, timeouts: TimeoutOptions) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[inline]
    pub fn security(mut self, security: SecurityOptions) -> Self {
        self.security = security;
        self
    }

    #[inline]
    pub fn io_thread_name(mut self, name: impl Into<String>) -> Self {
        self.io_thread_name = name.into();
        self
    }

    #[inline]
    pub fn conn_str(&self) -> &str {
        &self.conn_str
    }

    #[inline]
    pub fn get_credential(&self) -> &Credential {
        &self.credential
    }

    #[inline]
    pub fn get_timeouts(&self) -> &TimeoutOptions {
        &self.timeouts
    }

    #[inline]
    pub fn get_security(&self) -> &SecurityOptions {
        &self.security
    }

    #[inline]
    pub fn get_io_thread_name(&self) -> &str {
        &self.io_thread_name
    }

    /// Validate options before any thread is started.
    pub fn validate(&self) -> Result<()> {
        if self.conn_str.trim().is_empty() {
            return Err(Error::InvalidArgument("empty connection string".to_string()));
        }
        if self.io_thread_name.is_empty() {
            return Err(Error::InvalidArgument("empty io thread name".to_string()));
        }
        self.timeouts.validate()?;
        self.security.validate()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Default timeouts of operations. Enforced by the transport, not by
/// the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeoutOptions {
    pub connect_timeout: Option<Duration>,
    pub dispatch_timeout: Option<Duration>,
    pub query_timeout: Option<Duration>,
    pub management_timeout: Option<Duration>,
    pub resolve_timeout: Option<Duration>,
    pub socket_connect_timeout: Option<Duration>,
}

impl TimeoutOptions {
    #[inline]
    fn validate(&self) -> Result<()> {
        let all = [
            ("connect_timeout", self.connect_timeout),
            ("dispatch_timeout", self.dispatch_timeout),
            ("query_timeout", self.query_timeout),
            ("management_timeout", self.management_timeout),
            ("resolve_timeout", self.resolve_timeout),
            ("socket_connect_timeout", self.socket_connect_timeout),
        ];
        for (name, timeout) in all {
            if timeout == Some(Duration::ZERO) {
                return Err(Error::InvalidArgument(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityOptions {
    pub trust_only_capella: bool,
    pub trust_only_pem_file: Option<String>,
    pub trust_only_pem_string: Option<String>,
    pub trust_only_certificates: Vec<String>,
    pub trust_only_platform: bool,
    /// Trust any certificate. Never use it in production.
    pub disable_server_certificate_verification: bool,
    pub cipher_suites: Vec<String>,
}

impl SecurityOptions {
    #[inline]
    fn validate(&self) -> Result<()> {
        let sources = [
            self.trust_only_capella,
            self.trust_only_pem_file.is_some(),
            self.trust_only_pem_string.is_some(),
            !self.trust_only_certificates.is_empty(),
            self.trust_only_platform,
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if sources > 1 {
            return Err(Error::InvalidArgument(
                "only one trust source can be specified".to_string(),
            ));
        }
        Ok(())
    }
}
