use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotkeep::engine::Engine;
use slotkeep::geo::NoGeoProvider;
use slotkeep::identity::UserNameIdentity;
use slotkeep::openings::InMemoryOpenings;
use slotkeep::wire::{self, SlotkeepFactory, WireConfig};

const EVERY_DAY: &str = r#"{"mon":{"enabled":true,"start":"09:00","end":"17:00"},"tue":{"enabled":true,"start":"09:00","end":"17:00"},"wed":{"enabled":true,"start":"09:00","end":"17:00"},"thu":{"enabled":true,"start":"09:00","end":"17:00"},"fri":{"enabled":true,"start":"09:00","end":"17:00"},"sat":{"enabled":true,"start":"09:00","end":"17:00"},"sun":{"enabled":true,"start":"09:00","end":"17:00"}}"#;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(
            dir.join("slotkeep.wal"),
            Arc::new(InMemoryOpenings::new()),
            Arc::new(NoGeoProvider),
        )
        .unwrap(),
    );
    let factory = SlotkeepFactory::new(
        engine,
        &WireConfig {
            password: "slotkeep".into(),
            fallback_time_zone: "America/New_York".into(),
            identity: Arc::new(UserNameIdentity),
        },
    );

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory, None).await;
            });
        }
    });

    addr
}

async fn try_connect(addr: SocketAddr, user: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("slotkeep")
        .user(user)
        .password("slotkeep");

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    try_connect(addr, user).await.unwrap()
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// SQLSTATE and message of a rejected statement.
async fn rejected(client: &Client, sql: &str) -> (String, String) {
    let err = client.simple_query(sql).await.unwrap_err();
    let db = err.as_db_error().expect("expected a database error");
    (db.code().code().to_string(), db.message().to_string())
}

struct Salon {
    pro: Ulid,
    offering: Ulid,
    /// Two days out at 10:00 UTC.
    start: i64,
    date: String,
}

async fn setup_salon(addr: SocketAddr, auto_accept: bool) -> Salon {
    let pro = Ulid::new();
    let location = Ulid::new();
    let offering = Ulid::new();
    let conn = connect(addr, &format!("pro:{pro}")).await;
    conn.batch_execute(&format!(
        "INSERT INTO professionals (time_zone, auto_accept) VALUES ('America/Chicago', {auto_accept})"
    ))
    .await
    .unwrap();
    conn.batch_execute(&format!(
        "INSERT INTO locations (id, kind, is_primary, time_zone, working_hours, max_days_ahead, step_minutes) \
         VALUES ('{location}', 'SALON', true, 'UTC', '{EVERY_DAY}', 30, 30)"
    ))
    .await
    .unwrap();
    conn.batch_execute(&format!(
        "INSERT INTO offerings (id, service_id, salon_price_cents, salon_duration_minutes) \
         VALUES ('{offering}', '{}', 6000, 60)",
        Ulid::new()
    ))
    .await
    .unwrap();

    let day = (Utc::now() + Duration::days(2)).date_naive();
    let start = day
        .and_hms_opt(10, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis();
    Salon {
        pro,
        offering,
        start,
        date: day.to_string(),
    }
}

fn hold_sql(salon: &Salon) -> String {
    format!(
        "INSERT INTO holds (offering_id, scheduled_for, location_type) VALUES ('{}', {}, 'SALON')",
        salon.offering, salon.start
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn slots_hold_and_finalize() {
    let addr = start_test_server().await;
    let salon = setup_salon(addr, false).await;
    let client = Ulid::new();
    let conn = connect(addr, &format!("client:{client}")).await;

    let slots = rows(
        &conn,
        &format!(
            "SELECT * FROM slots WHERE offering_id = '{}' AND location_type = 'SALON' AND \"date\" = '{}'",
            salon.offering, salon.date
        ),
    )
    .await;
    // 09:00 through 16:00 on a 30 minute grid.
    assert_eq!(slots.len(), 15);
    assert_eq!(slots[0].get("time_zone"), Some("UTC"));
    let wanted = salon.start.to_string();
    assert!(slots.iter().any(|r| r.get("start_at") == Some(wanted.as_str())));

    let hold = rows(&conn, &hold_sql(&salon)).await;
    assert_eq!(hold.len(), 1);
    let hold_id = hold[0].get("id").unwrap().to_string();

    // Same request again returns the same hold.
    let again = rows(&conn, &hold_sql(&salon)).await;
    assert_eq!(again[0].get("id"), Some(hold_id.as_str()));

    // The held start disappears from the list.
    let slots = rows(
        &conn,
        &format!(
            "SELECT * FROM slots WHERE offering_id = '{}' AND location_type = 'SALON' AND \"date\" = '{}'",
            salon.offering, salon.date
        ),
    )
    .await;
    assert!(!slots.iter().any(|r| r.get("start_at") == Some(wanted.as_str())));

    let booking = rows(
        &conn,
        &format!(
            "INSERT INTO bookings (offering_id, hold_id, location_type) VALUES ('{}', '{hold_id}', 'SALON')",
            salon.offering
        ),
    )
    .await;
    assert_eq!(booking.len(), 1);
    let row = &booking[0];
    assert_eq!(row.get("status"), Some("PENDING"));
    assert_eq!(row.get("professional_id"), Some(salon.pro.to_string().as_str()));
    assert_eq!(row.get("subtotal_cents"), Some("6000"));
    assert_eq!(row.get("time_zone"), Some("UTC"));
    assert_eq!(row.get("time_zone_source"), Some("BOOKING"));

    // The hold was consumed.
    let deleted = conn
        .execute("DELETE FROM holds WHERE id = $1", &[&hold_id])
        .await
        .unwrap();
    assert_eq!(deleted, 0);
}

#[tokio::test]
async fn competing_hold_is_a_conflict() {
    let addr = start_test_server().await;
    let salon = setup_salon(addr, false).await;
    let first = connect(addr, &format!("client:{}", Ulid::new())).await;
    let second = connect(addr, &format!("client:{}", Ulid::new())).await;

    rows(&first, &hold_sql(&salon)).await;
    let (state, message) = rejected(&second, &hold_sql(&salon)).await;
    assert_eq!(state, "23P01");
    assert!(message.starts_with("TIME_HELD"), "{message}");
}

#[tokio::test]
async fn session_and_consultation_over_wire() {
    let addr = start_test_server().await;
    let salon = setup_salon(addr, true).await;
    let client = connect(addr, &format!("client:{}", Ulid::new())).await;
    let pro = connect(addr, &format!("pro:{}", salon.pro)).await;

    let hold = rows(&client, &hold_sql(&salon)).await;
    let hold_id = hold[0].get("id").unwrap().to_string();
    let booking = rows(
        &client,
        &format!(
            "INSERT INTO bookings (offering_id, hold_id, location_type, source) VALUES ('{}', '{hold_id}', 'SALON', 'DISCOVERY')",
            salon.offering
        ),
    )
    .await;
    assert_eq!(booking[0].get("status"), Some("ACCEPTED"));
    assert_eq!(booking[0].get("source"), Some("DISCOVERY"));
    let booking_id = booking[0].get("id").unwrap().to_string();

    let started = rows(
        &pro,
        &format!("INSERT INTO booking_actions (booking_id, action) VALUES ('{booking_id}', 'START')"),
    )
    .await;
    assert_eq!(started[0].get("session_step"), Some("CONSULTATION"));

    let proposal = rows(
        &pro,
        &format!(
            r#"INSERT INTO consultation_proposals (booking_id, services) VALUES ('{booking_id}', '[{{"service_id":null,"name":"Toner","price_cents":1500,"duration_minutes":15}}]')"#
        ),
    )
    .await;
    assert_eq!(proposal[0].get("status"), Some("PENDING"));
    assert_eq!(proposal[0].get("proposed_total_cents"), Some("1500"));

    let decision = rows(
        &client,
        &format!("INSERT INTO consultation_decisions (booking_id, decision) VALUES ('{booking_id}', 'APPROVE')"),
    )
    .await;
    assert_eq!(decision[0].get("status"), Some("APPROVED"));
    assert_eq!(decision[0].get("session_step"), Some("BEFORE_PHOTOS"));

    // A repeated answer reports the settled state.
    let repeat = rows(
        &client,
        &format!("INSERT INTO consultation_decisions (booking_id, decision) VALUES ('{booking_id}', 'REJECT')"),
    )
    .await;
    assert_eq!(repeat[0].get("status"), Some("APPROVED"));

    let done = rows(
        &pro,
        &format!("INSERT INTO booking_actions (booking_id, action) VALUES ('{booking_id}', 'COMPLETE')"),
    )
    .await;
    assert_eq!(done[0].get("status"), Some("COMPLETED"));
    assert!(done[0].get("aftercare_token").is_some());

    // Extended protocol read of a text column.
    let viewed = client
        .query("SELECT * FROM bookings WHERE id = $1", &[&booking_id])
        .await
        .unwrap();
    assert_eq!(viewed.len(), 1);
    let status: String = viewed[0].get("status");
    assert_eq!(status, "COMPLETED");
}

#[tokio::test]
async fn roles_are_enforced() {
    let addr = start_test_server().await;
    let salon = setup_salon(addr, false).await;
    let client = connect(addr, &format!("client:{}", Ulid::new())).await;

    let (state, message) = rejected(
        &client,
        &format!(
            "INSERT INTO offerings (id, service_id, salon_duration_minutes) VALUES ('{}', '{}', 30)",
            Ulid::new(),
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(state, "42501");
    assert!(message.starts_with("UNAUTHORIZED"), "{message}");

    let other_pro = connect(addr, &format!("pro:{}", Ulid::new())).await;
    let (state, _) = rejected(&other_pro, &hold_sql(&salon)).await;
    assert_eq!(state, "42501");
}

#[tokio::test]
async fn bad_sql_and_unknown_users() {
    let addr = start_test_server().await;
    let conn = connect(addr, "admin").await;

    let (state, _) = rejected(&conn, "SELECT * FROM nowhere WHERE id = 'x'").await;
    assert_eq!(state, "42601");

    let (state, message) = rejected(
        &conn,
        &format!("SELECT * FROM bookings WHERE id = '{}'", Ulid::new()),
    )
    .await;
    assert_eq!(state, "P0002");
    assert!(message.starts_with("NOT_FOUND"), "{message}");

    assert!(try_connect(addr, "postgres").await.is_err());
}
