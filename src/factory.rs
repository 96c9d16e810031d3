//! The contract between the pool and whatever produces its resources

use std::time::Duration;

/// Creates, validates and closes the raw resources a pool manages.
///
/// Connection parameters (host, credentials, ...) belong to the factory; the
/// pool never looks at them.
///
/// `close` takes the resource by shared reference because the pool may have
/// to force-close a resource that is still checked out when it shuts down.
/// Resources that need mutation while borrowed should use interior
/// mutability.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::ResourceFactory;
/// use std::convert::Infallible;
/// use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// struct Session {
///     id: usize,
///     open: AtomicBool,
/// }
///
/// struct SessionFactory {
///     next_id: AtomicUsize,
/// }
///
/// impl ResourceFactory for SessionFactory {
///     type Resource = Session;
///     type Error = Infallible;
///
///     fn create(&self) -> Result<Session, Infallible> {
///         let id = self.next_id.fetch_add(1, Ordering::Relaxed);
///         Ok(Session { id, open: AtomicBool::new(true) })
///     }
///
///     fn validate(&self, session: &Session, _timeout: Duration) -> bool {
///         session.open.load(Ordering::Acquire)
///     }
///
///     fn close(&self, session: &Session) -> Result<(), Infallible> {
///         session.open.store(false, Ordering::Release);
///         Ok(())
///     }
/// }
/// ```
pub trait ResourceFactory: Send + Sync + 'static {
    /// The raw resource handed to borrowers
    type Resource: Send + Sync + 'static;

    /// Error returned by `create` and `close`
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a brand new resource
    fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Check that `resource` is still usable, giving up after `timeout`.
    ///
    /// Hitting the timeout must be reported as `false`.
    fn validate(&self, resource: &Self::Resource, timeout: Duration) -> bool;

    /// Release whatever the resource holds on to. Best effort.
    fn close(&self, resource: &Self::Resource) -> Result<(), Self::Error>;
}
