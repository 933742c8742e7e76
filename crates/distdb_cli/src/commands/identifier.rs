//! Identifier command implementation.

use distdb_storage::StoreIdentity;

/// Runs the identifier command.
pub fn run(user: &str, app: &str, store: &str) -> Result<(), Box<dyn std::error::Error>> {
    let identity = StoreIdentity::new(user, app, store);
    identity.validate()?;
    println!("Store:      {identity}");
    println!("Identifier: {}", identity.identifier_hex());
    println!("Log form:   {}", identity.anonymous());
    Ok(())
}
