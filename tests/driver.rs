//! End-to-end checks against a real `libchdb`. Each test skips itself when the library cannot be
//! loaded (set `CHDB_LIB_PATH` to point at one).

use chdb::{Connection, Error};
use serde_json::Value;

fn connect() -> Option<Connection> {
    if let Err(e) = chdb::runtime() {
        eprintln!("skipping: {e}");
        return None;
    }
    Some(Connection::connect(":memory:").expect("in-memory connect"))
}

#[test]
fn select_42_json_compact() -> chdb::Result<()> {
    let Some(conn) = connect() else { return Ok(()) };

    let res = conn.query("SELECT 42", "JSONCompactEachRow")?;
    assert_eq!(res.error(), None);
    assert_eq!(res.text().unwrap(), "[42]\n");

    let row: Value = serde_json::from_slice(res.data()).expect("valid json");
    assert_eq!(row, serde_json::json!([42]));
    Ok(())
}

#[test]
fn invalid_sql_comes_back_as_data() -> chdb::Result<()> {
    let Some(conn) = connect() else { return Ok(()) };

    let res = conn.query("SELEC 42 FROM", "CSV")?;
    assert!(res.is_error(), "expected an engine error, got {res:?}");
    assert!(!res.error().unwrap().is_empty());
    Ok(())
}

#[test]
fn close_is_idempotent_and_blocks_queries() {
    let Some(mut conn) = connect() else { return };

    conn.close();
    conn.close();
    assert!(matches!(
        conn.query("SELECT 1", "CSV"),
        Err(Error::UseAfterClose)
    ));
}

#[test]
fn empty_connection_string() {
    // Rejected before the library is even loaded.
    assert!(matches!(Connection::connect(""), Err(Error::Connect(_))));
}

#[test]
fn double_release_leaves_later_results_intact() -> chdb::Result<()> {
    let Some(conn) = connect() else { return Ok(()) };

    let mut a = conn.query("SELECT 1", "CSV")?;
    a.release();
    a.release();

    let b = conn.query("SELECT 'still fine'", "TSV")?;
    assert_eq!(b.text().unwrap(), "still fine\n");
    Ok(())
}

#[test]
fn stateless_query() -> chdb::Result<()> {
    if chdb::runtime().is_err() {
        return Ok(());
    }
    let res = chdb::query("SELECT 1 + 1", "CSV")?;
    assert_eq!(res.error(), None);
    assert_eq!(res.text().unwrap(), "2\n");
    Ok(())
}

#[test]
fn two_connections_two_threads() {
    if chdb::runtime().is_err() {
        return;
    }

    let workers: Vec<_> = (0..2)
        .map(|_| {
            std::thread::spawn(|| {
                let mut conn = Connection::connect(":memory:").expect("in-memory connect");
                for _ in 0..20 {
                    let res = conn.query("SELECT 42", "JSONCompactEachRow").unwrap();
                    assert_eq!(res.error(), None);
                    assert_eq!(res.text().unwrap(), "[42]\n");
                }
                conn.close();
            })
        })
        .collect();
    for w in workers {
        w.join().expect("worker panicked");
    }
}
