pub mod card;
pub mod decrypt;
pub mod encrypt;
pub mod key;
