//! # LastWord Vault
//!
//! Encrypted-at-rest message content, revealed only at release time.
//!
//! ## Encryption Model
//!
//! 1. **Content Key**: a fresh ChaCha20-Poly1305 key encrypts the plaintext
//! 2. **Wrapped Key**: the content key is wrapped to the vault's X25519
//!    release key through an ephemeral key agreement
//! 3. **Digest**: blake3 of the plaintext, stored beside the ciphertext
//!
//! ## Reveal
//!
//! [`Vault::reveal`] requires a [`ReleaseCapability`] signed by the engine's
//! [`ReleaseAuthority`]. Capabilities are minted by the lifecycle when a
//! message enters `Delivering`; the vault never mints.
//!
//! ```rust,no_run
//! use lastword_core::{MessageId, ReleaseAuthority};
//! use lastword_vault::{Sealer, Vault, VaultSecret};
//!
//! let authority = ReleaseAuthority::generate();
//! let vault = Vault::new(VaultSecret::generate(), authority.public_key());
//!
//! let sealed = Sealer::new(vault.public_key()).seal(b"hello", b"owner").unwrap();
//! let message_id = MessageId::generate();
//! let capability = authority.mint(message_id, sealed.digest, 0);
//! let revealed = vault.reveal(&message_id, &sealed, &capability).unwrap();
//! assert_eq!(&revealed.plaintext[..], b"hello");
//! ```

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod vault;

pub use crypto::{ContentKey, ContentNonce, VaultPublicKey, VaultSecret};
pub use envelope::{EnvelopeFormat, SealedEnvelope, Sealer};
pub use error::{Result, VaultError};
pub use lastword_core::{ReleaseAuthority, ReleaseCapability};
pub use vault::{RevealedContent, Vault};
