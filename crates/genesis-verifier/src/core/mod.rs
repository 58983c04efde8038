//! Core logic for the verification service

mod verification;

pub use verification::{
    merge_known_states, record_observed, verify_document, AttestationAnchoring, DocumentOptions,
    DocumentReport, SignatureFailure, MAX_RECORD_ATTEMPTS,
};
