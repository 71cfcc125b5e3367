use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Days, Local};
use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use slotd::engine::EngineConfig;
use slotd::venue::VenueManager;
use slotd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<VenueManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let venues = Arc::new(VenueManager::new(dir, 3600, EngineConfig::default()));

    let vm = venues.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let vm = vm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, vm, "slotd".to_string(), None).await;
            });
        }
    });

    (addr, venues)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user("slotd")
        .password("slotd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Collect the data rows of a simple query.
fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// A (date, time) pair safely outside the 72h cancellation window but
/// inside the one-week notification window.
fn slot_within_week() -> (String, String) {
    let start = Local::now().naive_local() + Days::new(4);
    (
        start.date().format("%Y-%m-%d").to_string(),
        "18:30".to_string(),
    )
}

/// A (date, time) pair beyond the one-week notification window.
fn slot_beyond_week() -> (String, String) {
    let start = Local::now().naive_local() + Days::new(30);
    (
        start.date().format("%Y-%m-%d").to_string(),
        "10:00".to_string(),
    )
}

async fn create_session(
    client: &tokio_postgres::Client,
    session_type: &str,
    date: &str,
    time: &str,
    capacity: u32,
) -> String {
    let rows = data_rows(
        client
            .simple_query(&format!(
                "INSERT INTO sessions (session_type, date, time, duration, capacity) \
                 VALUES ('{session_type}', '{date}', '{time}', 60, {capacity})"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    rows[0].get("id").unwrap().to_string()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn full_booking_flow() {
    let (addr, _venues) = start_test_server().await;
    let client = connect(addr).await;

    let (date, time) = slot_within_week();
    let sid = create_session(&client, "rookie", &date, &time, 2).await;

    // Two seats fill the session
    client
        .simple_query(&format!(
            "INSERT INTO bookings (session_id, first_name, last_name) VALUES ('{sid}', 'Alice', 'Ash')"
        ))
        .await
        .unwrap();
    client
        .simple_query(&format!(
            "INSERT INTO bookings (session_id, first_name, last_name) VALUES ('{sid}', 'Bob', 'Birch')"
        ))
        .await
        .unwrap();

    // Third booking hits the capacity gate
    let refused = client
        .simple_query(&format!(
            "INSERT INTO bookings (session_id, first_name, last_name) VALUES ('{sid}', 'Carol', 'Cedar')"
        ))
        .await;
    let err = refused.err().unwrap();
    assert!(err.to_string().contains("capacity"));

    // Carol queues instead, first in line
    let rows = data_rows(
        client
            .simple_query(&format!(
                "INSERT INTO waitlist (session_id, email, first_name, last_name) \
                 VALUES ('{sid}', 'carol@example.com', 'Carol', 'Cedar')"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("position"), Some("1"));

    // Booked/waitlisted counts show up in the session row
    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM sessions WHERE id = '{sid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("booked"), Some("2"));
    assert_eq!(rows[0].get("waitlisted"), Some("1"));

    // Alice cancels ~96h ahead: allowed, host notified, Carol surfaced
    let rows = data_rows(
        client
            .simple_query(&format!(
                "DELETE FROM bookings WHERE session_id = '{sid}' \
                 AND first_name = 'Alice' AND last_name = 'Ash'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert!(matches!(
        rows[0].get("needs_notification"),
        Some("t") | Some("true")
    ));
    let next = rows[0].get("next_on_waitlist").unwrap();
    assert!(next.contains("carol@example.com"));

    // One seat free again, Bob still at position 0
    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM bookings WHERE session_id = '{sid}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("first_name"), Some("Bob"));
    assert_eq!(rows[0].get("position"), Some("0"));
}

#[tokio::test]
async fn guest_token_cancellation() {
    let (addr, _venues) = start_test_server().await;
    let client = connect(addr).await;

    let (date, time) = slot_beyond_week();
    let sid = create_session(&client, "advanced", &date, &time, 4).await;

    let rows = data_rows(
        client
            .simple_query(&format!(
                "INSERT INTO bookings (session_id, first_name, last_name, notes, email, is_guest) \
                 VALUES ('{sid}', 'Gwen', 'Gale', NULL, 'x@y.com', true)"
            ))
            .await
            .unwrap(),
    );
    let token = rows[0].get("cancellation_token").unwrap().to_string();
    assert!(token.starts_with("cancel_"));

    // 30 days out: succeeds and no host notification needed
    let rows = data_rows(
        client
            .simple_query(&format!(
                "DELETE FROM bookings WHERE cancellation_token = '{token}'"
            ))
            .await
            .unwrap(),
    );
    assert!(matches!(
        rows[0].get("needs_notification"),
        Some("f") | Some("false")
    ));

    // Token is single-use
    let again = client
        .simple_query(&format!(
            "DELETE FROM bookings WHERE cancellation_token = '{token}'"
        ))
        .await;
    assert!(again.is_err());
}

#[tokio::test]
async fn duplicate_session_rejected_over_the_wire() {
    let (addr, _venues) = start_test_server().await;
    let client = connect(addr).await;

    let (date, time) = slot_beyond_week();
    create_session(&client, "rookie", &date, &time, 4).await;

    let dup = client
        .simple_query(&format!(
            "INSERT INTO sessions (session_type, date, time, duration, capacity) \
             VALUES ('rookie', '{date}', '{time}', 60, 4)"
        ))
        .await;
    let err = dup.err().unwrap();
    assert!(err.to_string().contains("already exists"));

    let rows = data_rows(client.simple_query("SELECT * FROM sessions").await.unwrap());
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn batch_booking_is_atomic_over_the_wire() {
    let (addr, _venues) = start_test_server().await;
    let client = connect(addr).await;

    let (date, time) = slot_beyond_week();
    let sid = create_session(&client, "rookie", &date, &time, 2).await;

    // Three seats into a two-seat session: nothing lands
    let refused = client
        .simple_query(&format!(
            "INSERT INTO bookings (session_id, first_name, last_name) VALUES \
             ('{sid}', 'Alice', 'Ash'), ('{sid}', 'Bob', 'Birch'), ('{sid}', 'Carol', 'Cedar')"
        ))
        .await;
    assert!(refused.is_err());
    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM bookings WHERE session_id = '{sid}'"))
            .await
            .unwrap(),
    );
    assert!(rows.is_empty());

    // A fitting batch shares the submitter email, distinct tokens each
    let rows = data_rows(
        client
            .simple_query(&format!(
                "INSERT INTO bookings (session_id, first_name, last_name, notes, email) VALUES \
                 ('{sid}', 'Alice', 'Ash', NULL, 'group@example.com'), \
                 ('{sid}', 'Bob', 'Birch', NULL, NULL)"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
    let token_a = rows[0].get("cancellation_token").unwrap();
    let token_b = rows[1].get("cancellation_token").unwrap();
    assert_ne!(token_a, token_b);
}

#[tokio::test]
async fn waitlist_head_and_removal() {
    let (addr, _venues) = start_test_server().await;
    let client = connect(addr).await;

    let (date, time) = slot_beyond_week();
    let sid = create_session(&client, "rookie", &date, &time, 1).await;

    for (email, first, last) in [
        ("a@example.com", "Ann", "Alder"),
        ("b@example.com", "Ben", "Birch"),
    ] {
        client
            .simple_query(&format!(
                "INSERT INTO waitlist (session_id, email, first_name, last_name) \
                 VALUES ('{sid}', '{email}', '{first}', '{last}')"
            ))
            .await
            .unwrap();
    }

    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM waitlist_head WHERE session_id = '{sid}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("email"), Some("a@example.com"));

    client
        .simple_query(&format!(
            "DELETE FROM waitlist WHERE session_id = '{sid}' AND email = 'a@example.com'"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM waitlist_head WHERE session_id = '{sid}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("email"), Some("b@example.com"));
}

#[tokio::test]
async fn venues_are_isolated_over_the_wire() {
    let (addr, _venues) = start_test_server().await;
    let client_a = connect(addr).await;

    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("other_venue")
        .user("slotd")
        .password("slotd");
    let (client_b, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let (date, time) = slot_beyond_week();
    create_session(&client_a, "rookie", &date, &time, 4).await;

    let rows = data_rows(client_b.simple_query("SELECT * FROM sessions").await.unwrap());
    assert!(rows.is_empty());
}
