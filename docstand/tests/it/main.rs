/*! Integration tests for docstand.
 *
 * This test suite is organized as a single integration test binary.
 *
 * - collection: Tests for the collection contract over the in-memory backend
 * - database: Tests for databases and the document store
 * - dispatch: Tests for command decoding, routing and replies
 * - concurrency: Tests for concurrent access to shared collections
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("docstand=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod collection;
mod concurrency;
mod database;
mod dispatch;
mod helpers;
