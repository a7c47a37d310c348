//! Navigator and location queries.

/// Connectivity and display-mode queries (`navigator.onLine`,
/// `matchMedia('(display-mode: standalone)')`).
pub trait Navigator: Send + Sync {
    /// Binary connectivity as reported by the platform.
    fn on_line(&self) -> bool;

    /// Whether the page is running as an installed, standalone app.
    fn display_mode_standalone(&self) -> bool;
}

/// The page location.
pub trait Location: Send + Sync {
    /// Reload the page, bypassing in-memory state.
    fn reload(&self);
}
