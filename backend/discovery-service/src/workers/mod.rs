/// Background workers spawned next to the HTTP server
pub mod outbox_worker;
pub mod processed_cleanup;
