/// Guest lifecycle: enrollment, profiles, guestbook notes, removal.
pub mod guest_service;
/// Scavenger-hunt marks and progress views.
pub mod hunt_service;
/// Catalog seeding and whole-party resets.
pub mod party_service;
/// King-of-the-hill queue operations.
pub mod queue_service;
/// Storage reconnection loop driving the degraded flag.
pub mod storage_supervisor;
/// Sweater votes and poll answers.
pub mod vote_service;
