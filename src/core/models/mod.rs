pub mod card;
pub mod identity;
pub mod keys;
pub mod recipient;
pub mod transform;
