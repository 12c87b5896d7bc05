//! Error types for menu construction and display.

/// Errors produced by the native menu layer.
#[derive(Debug, thiserror::Error)]
pub enum MenuError {
    #[error("{call} failed: {source}")]
    Native {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("a menu is already being shown on this thread")]
    ShowInProgress,

    #[error("menu tree has already been shown")]
    AlreadyShown,

    #[error("menu tree has been disposed")]
    Disposed,

    #[error("root popup menu is missing")]
    NoRootMenu,
}

impl MenuError {
    /// Wraps the calling thread's last OS error for a failed native call.
    pub fn last_os_error(call: &'static str) -> Self {
        Self::Native {
            call,
            source: std::io::Error::last_os_error(),
        }
    }
}
