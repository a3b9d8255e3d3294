//! Core library for `shiblink`.
//!
//! Contains the attribute cipher, the encrypted attribute store, credential
//! verification (bearer-token introspection and signed assertions), the
//! authentication resolver, and the identity-linking protocol. This crate
//! depends on `shiblink-storage` for the record store trait and knows
//! nothing about HTTP routing.

pub mod attributes;
pub mod cipher;
pub mod error;
pub mod linking;
pub mod resolver;
pub mod verifier;
