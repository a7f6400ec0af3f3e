//! # CLI - statfile inspection shell
//!
//! A REPL over a statfile pool. Reads commands from stdin, runs them against
//! the pool and prints results to stdout. Logs go to stderr. Works both
//! interactively and scripted (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! CREATE path size            Create a zero-filled statfile of `size` bytes
//! OPEN path [size] [FORCE]    Open (migrating to `size` unless FORCE) and select
//! USE symbol [CREATE]         Select the classifier statfile bound to `symbol`
//! GET h1 h2                   Print the value stored for (h1, h2)
//! SET h1 h2 value             Store a value
//! SECTION [name|code]         Show or switch the active section
//! ADDSECTION name|code length Append a section to the selected file
//! SECTIONS                    List the sections of the selected file
//! REV / SETREV r t / INCREV   Read, set or bump the revision
//! BLOOM ADD|DEL|CHECK token   Work with a scratch counting bloom filter
//! FLUSH                       Flush every open statfile now
//! CLOSE                       Close the selected statfile
//! STATS                       Print pool and file debug info
//! EXIT / QUIT                 Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! ```text
//! STATFILE_MLOCK              lock mapped pages in RAM     (default: "false")
//! STATFILE_MAX_OPEN           open statfile hard limit     (default: 255)
//! STATFILE_INVALIDATE_SECS    periodic flush period        (default: 30)
//! STATFILE_INVALIDATE_JITTER  random extra flush delay     (default: 30)
//! STATFILE_CLASSIFIER         classifier file for USE      (default: none)
//! STATFILE_BLOOM_SIZE         scratch bloom filter slots   (default: 65536)
//! RUST_LOG                    log filter                   (default: "warn")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! statfile shell started (max_open=255, mlock=false, invalidate=30s+30s)
//! > CREATE /tmp/bayes.spam 16304
//! OK (1000 blocks)
//! > OPEN /tmp/bayes.spam
//! OK /tmp/bayes.spam (blocks=1000, used=0, section=common)
//! > SET 42 7 3.5
//! OK
//! > GET 42 7
//! 3.5
//! > EXIT
//! bye
//! ```

mod session;

use anyhow::{Context, Result};
use bloom::CountingBloomFilter;
use config::{ClassifierConfig, PoolConfig};
use pool::StatfilePool;
use session::{Flow, Session};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Number of default hash functions used by the scratch bloom filter.
const BLOOM_HASHES: usize = 4;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()
        .context("failed to start flush runtime")?;
    let _guard = runtime.enter();

    let pool_cfg = PoolConfig::from_env();
    let classifier = match std::env::var("STATFILE_CLASSIFIER") {
        Ok(path) => {
            let cfg = ClassifierConfig::load(Path::new(&path))?;
            info!(path = %path, statfiles = cfg.statfiles.len(), "loaded classifier");
            Some(cfg)
        }
        Err(_) => None,
    };
    let bloom_size: usize = env_or("STATFILE_BLOOM_SIZE", "65536")
        .parse()
        .unwrap_or(65536)
        .max(1);

    let pool = Arc::new(StatfilePool::new(&pool_cfg));
    pool.plan_invalidate(pool_cfg.invalidate_period, pool_cfg.invalidate_jitter)?;

    println!(
        "statfile shell started (max_open={}, mlock={}, invalidate={}s+{}s)",
        pool_cfg.max_open,
        pool_cfg.mlock,
        pool_cfg.invalidate_period.as_secs(),
        pool_cfg.invalidate_jitter.as_secs()
    );
    if let Some(cfg) = &classifier {
        println!("classifier {} ({} statfiles)", cfg.name, cfg.statfiles.len());
    }
    println!("Commands: CREATE | OPEN | USE | GET | SET | SECTION | ADDSECTION | SECTIONS");
    println!("          REV | SETREV | INCREV | BLOOM | FLUSH | CLOSE | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let mut session = Session::new(
        Arc::clone(&pool),
        classifier,
        CountingBloomFilter::with_default_hashes(bloom_size, BLOOM_HASHES),
    );

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let (reply, flow) = session.execute(&line);
        if !reply.is_empty() {
            println!("{reply}");
        }
        if flow == Flow::Exit {
            break;
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    drop(session);
    info!(opened = pool.opened(), "shutting down statfile pool");
    pool.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::session::{Flow, Session};
    use bloom::CountingBloomFilter;
    use config::{ClassifierConfig, PoolConfig};
    use pool::StatfilePool;
    use std::sync::Arc;

    fn session(classifier: Option<ClassifierConfig>) -> Session {
        let pool = Arc::new(StatfilePool::new(&PoolConfig::default()));
        Session::new(pool, classifier, CountingBloomFilter::with_default_hashes(1024, 4))
    }

    fn run(session: &mut Session, line: &str) -> String {
        session.execute(line).0
    }

    #[test]
    fn create_open_set_get() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.stat");
        let path = path.to_str().unwrap();
        let mut s = session(None);

        assert_eq!(run(&mut s, &format!("CREATE {path} 16304")), "OK (1000 blocks)");
        assert!(run(&mut s, &format!("OPEN {path}")).contains("blocks=1000"));
        assert_eq!(run(&mut s, "SET 42 7 3.5"), "OK");
        assert_eq!(run(&mut s, "SET 42 7 4.5"), "OK (updated)");
        assert_eq!(run(&mut s, "GET 42 7"), "4.5");
        assert_eq!(run(&mut s, "GET 99 1"), "0");
    }

    #[test]
    fn commands_need_a_selected_file() {
        let mut s = session(None);
        assert!(run(&mut s, "GET 1 1").starts_with("ERR no statfile selected"));
        assert!(run(&mut s, "CLOSE").starts_with("ERR"));
    }

    #[test]
    fn usage_and_parse_errors() {
        let mut s = session(None);
        assert_eq!(run(&mut s, "SET 1"), "ERR usage: SET h1 h2 value");
        assert!(run(&mut s, "CREATE /tmp/x nope").starts_with("ERR invalid size: nope"));
        assert_eq!(run(&mut s, "FROB"), "ERR unknown command: FROB");
        assert_eq!(run(&mut s, ""), "");
    }

    #[test]
    fn sections_and_revision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.stat");
        let path = path.to_str().unwrap();
        let mut s = session(None);

        run(&mut s, &format!("CREATE {path} 1904"));
        run(&mut s, &format!("OPEN {path}"));
        assert_eq!(run(&mut s, "ADDSECTION url 10"), "OK");
        assert_eq!(
            run(&mut s, "SECTIONS"),
            "common length=100\nurl length=10\n(2 sections)"
        );
        assert_eq!(run(&mut s, "SECTION url"), "OK");
        assert_eq!(run(&mut s, "SECTION"), "url");
        assert_eq!(run(&mut s, "SECTION regexp"), "ERR no such section: regexp");

        assert_eq!(run(&mut s, "SETREV 4 100"), "OK");
        assert_eq!(run(&mut s, "INCREV"), "revision=5");
        assert_eq!(run(&mut s, "REV"), "revision=5 time=100");
    }

    #[test]
    fn use_resolves_classifier_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ClassifierConfig::new("bayes");
        cfg.add_statfile("BAYES_SPAM", dir.path().join("spam.stat"), 16304);
        let mut s = session(Some(cfg));

        assert!(run(&mut s, "USE BAYES_SPAM").starts_with("ERR"));
        assert!(run(&mut s, "USE BAYES_SPAM CREATE").contains("blocks=1000"));
        assert!(run(&mut s, "USE BAYES_HAM").starts_with("ERR"));
        assert_eq!(run(&mut s, "CLOSE"), "OK");
    }

    #[test]
    fn bloom_commands() {
        let mut s = session(None);
        assert_eq!(run(&mut s, "BLOOM CHECK viagra"), "no");
        assert_eq!(run(&mut s, "BLOOM ADD viagra"), "OK");
        assert_eq!(run(&mut s, "BLOOM CHECK viagra"), "yes");
        assert_eq!(run(&mut s, "BLOOM DEL viagra"), "OK");
        assert_eq!(run(&mut s, "BLOOM CHECK viagra"), "no");
    }

    #[test]
    fn exit_stops_the_loop() {
        let mut s = session(None);
        assert_eq!(s.execute("quit"), ("bye".to_string(), Flow::Exit));
    }
}
