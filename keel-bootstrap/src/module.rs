use di::ServiceCollection;

/// a module used for di configuration.
///
/// # Example
/// ```
/// use di::*;
/// use keel_bootstrap::module::Module;
///
/// #[injectable]
/// pub struct A;
/// pub struct MyModule;
///
/// impl Module for MyModule {
///     fn configure(&self, binder: &mut ServiceCollection) {
///         binder.add(A::singleton());
///     }
/// }
/// ```
pub trait Module {
    /// Registers the module's services.
    fn configure(&self, binder: &mut ServiceCollection);
}
