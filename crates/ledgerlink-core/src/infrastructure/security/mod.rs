//! Credential storage backed by the operating system

pub mod keyring;

pub use self::keyring::KeyringDelegationStore;
