//! # BasedCart coordinator
//!
//! Client-side coordination for BasedCart, a delivery-bounty marketplace on
//! Base. Carts are escrow contracts created by a factory and funded in an
//! ERC-20 token; a fulfiller claims a cart, and its owner either pays them
//! out or withdraws and destroys the cart.
//!
//! The crate sequences the two-step approve-then-act flows, derives which
//! lifecycle actions a viewer may take, and keeps a roster of every cart
//! consistent with the ledger after each confirmed mutation.
//!
//! ## Layout
//!
//! | Module        | Role                                                  |
//! |---------------|-------------------------------------------------------|
//! | `gateway`     | `LedgerGateway` trait, calls, receipts, timeouts      |
//! | `rpc`         | JSON-RPC implementation of the gateway                |
//! | `abi`         | Calldata encoding and return-data decoding            |
//! | `events`      | Cart event topics and receipt log decoding            |
//! | `allowance`   | Approve-then-act state machine                        |
//! | `lifecycle`   | Claim/close/delete legality and create validation     |
//! | `cache`       | Roster snapshot with invalidate-and-refetch           |
//! | `roster`      | Normalization and per-viewer partition                |
//! | `pending`     | Per cart+action request tokens                        |
//! | `coordinator` | One viewer session wiring all of the above            |

pub mod abi;
pub mod allowance;
pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod lifecycle;
pub mod pending;
pub mod roster;
pub mod rpc;
pub mod types;

#[cfg(any(test, feature = "testutils"))]
pub mod sim;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_claims;
#[cfg(test)]
mod test_funding;
#[cfg(test)]
mod test_roster;
