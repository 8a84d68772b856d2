//! REPL CLI: opens a [`pagedb::Db`] and runs lines of SQL interactively, printing
//! results as a formatted table.

use std::io::Write;

use pagedb::Db;

fn format_rows(header: &[&str], rows: &[String]) {
    println!("   | {} |", header.iter().map(|h| format!("{:15}", h)).collect::<Vec<_>>().join(" | "));
    for row in rows {
        let cells = row.split('|').map(|c| format!("{:15}", c)).collect::<Vec<_>>().join(" | ");
        println!("   | {} |", cells);
    }
    println!("({} row{})", rows.len(), if rows.len() == 1 { "" } else { "s" });
}

fn select_header(sql: &str) -> Vec<&str> {
    // Best-effort column header for display only; the executor itself doesn't track names
    // for `SELECT *`, so we just fall back to the raw piped row width.
    let upper = sql.to_ascii_uppercase();
    if let (Some(from_idx), Some(select_idx)) = (upper.find(" FROM "), upper.find("SELECT")) {
        let list = sql[select_idx + 6..from_idx].trim();
        if list != "*" {
            return list.split(',').map(|s| s.trim()).collect();
        }
    }
    vec!["col"]
}

fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| "./pagedb.db".to_string());
    let mut db = match Db::open(&path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("failed to open database at {path}: {e}");
            std::process::exit(1);
        }
    };
    println!("pagedb REPL — opened {path}. Enter SQL statements, 'checkpoint', 'vacuum <dst-path>', or 'quit'.");

    let stdin = std::io::stdin();
    let mut buffer = String::new();
    loop {
        print!("pagedb> ");
        std::io::stdout().flush().ok();
        buffer.clear();
        if stdin.read_line(&mut buffer).unwrap_or(0) == 0 {
            break;
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }
        if line.eq_ignore_ascii_case("checkpoint") {
            match db.checkpoint() {
                Ok(n) => println!("checkpointed {n} page(s)"),
                Err(e) => eprintln!("error: {e}"),
            }
            continue;
        }
        if line.len() > 7 && line[..7].eq_ignore_ascii_case("vacuum ") {
            let dst_path = line[7..].trim();
            match db.vacuum_into(dst_path) {
                Ok(()) => println!("vacuumed into {dst_path}"),
                Err(e) => eprintln!("error: {e}"),
            }
            continue;
        }
        let is_select = line.to_ascii_uppercase().starts_with("SELECT");
        match db.exec_sql(line) {
            Ok(rows) => {
                if is_select {
                    format_rows(&select_header(line), &rows);
                } else {
                    println!("OK");
                }
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
}
