//! Pluggable address validation, run after the built-in presence/emptiness checks

/// Format check applied before the processor is invoked.
/// The returned message is shown to the caller.
pub trait AddressValidator: Send + Sync {
    fn validate(&self, address: &str) -> Result<(), String>;
}

impl<F> AddressValidator for F
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, address: &str) -> Result<(), String> {
        self(address)
    }
}

/// Rejects addresses longer than the given number of characters
#[derive(Debug, Clone, Copy)]
pub struct MaxLength(pub usize);

impl AddressValidator for MaxLength {
    fn validate(&self, address: &str) -> Result<(), String> {
        let len = address.chars().count();
        if len > self.0 {
            return Err(format!(
                "`address` is too long ({len} characters, max {})",
                self.0
            ));
        }
        Ok(())
    }
}
