use anyhow::{anyhow, bail, Context, Result};
use bloom::CountingBloomFilter;
use config::ClassifierConfig;
use pool::StatfilePool;
use statfile::{section_code_by_name, section_name, SetOutcome, Statfile};
use std::fmt::Write as _;
use std::str::{FromStr, SplitWhitespace};
use std::sync::Arc;

/// Whether the shell keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// State of one shell: the pool, the statfile commands act on and a scratch
/// bloom filter.
pub struct Session {
    pool: Arc<StatfilePool>,
    classifier: Option<ClassifierConfig>,
    current: Option<Arc<Statfile>>,
    bloom: CountingBloomFilter,
}

impl Session {
    pub fn new(
        pool: Arc<StatfilePool>,
        classifier: Option<ClassifierConfig>,
        bloom: CountingBloomFilter,
    ) -> Self {
        Self {
            pool,
            classifier,
            current: None,
            bloom,
        }
    }

    /// Runs one input line and returns the text to print (possibly empty).
    pub fn execute(&mut self, line: &str) -> (String, Flow) {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return (String::new(), Flow::Continue);
        };

        let cmd = cmd.to_uppercase();
        if cmd == "EXIT" || cmd == "QUIT" {
            return ("bye".to_string(), Flow::Exit);
        }

        let reply = match self.dispatch(&cmd, parts) {
            Ok(out) => out,
            Err(e) => format!("ERR {e:#}"),
        };
        (reply, Flow::Continue)
    }

    fn dispatch(&mut self, cmd: &str, mut args: SplitWhitespace<'_>) -> Result<String> {
        match cmd {
            "CREATE" => {
                let (Some(path), Some(size)) = (args.next(), args.next()) else {
                    bail!("usage: CREATE path size");
                };
                let size: u64 = parse(size, "size")?;
                self.pool.create(path, size)?;
                Ok(format!("OK ({} blocks)", statfile::blocks_for_size(size)))
            }
            "OPEN" => {
                let Some(path) = args.next() else {
                    bail!("usage: OPEN path [size] [FORCE]");
                };
                let size = match args.next() {
                    Some(size) => parse(size, "size")?,
                    None => std::fs::metadata(path)
                        .with_context(|| format!("cannot stat {path}"))?
                        .len(),
                };
                let forced = args
                    .next()
                    .is_some_and(|flag| flag.eq_ignore_ascii_case("FORCE"));
                let st = self.pool.open(path, size, forced)?;
                self.current = Some(st);
                self.describe()
            }
            "USE" => {
                let Some(symbol) = args.next() else {
                    bail!("usage: USE symbol [CREATE]");
                };
                let try_create = args
                    .next()
                    .is_some_and(|flag| flag.eq_ignore_ascii_case("CREATE"));
                let classifier = self
                    .classifier
                    .as_ref()
                    .ok_or_else(|| anyhow!("no classifier loaded (set STATFILE_CLASSIFIER)"))?;
                let (st, _) = self
                    .pool
                    .get_statfile_by_symbol(classifier, symbol, try_create)?;
                self.current = Some(st);
                self.describe()
            }
            "GET" => {
                let (Some(h1), Some(h2)) = (args.next(), args.next()) else {
                    bail!("usage: GET h1 h2");
                };
                let (h1, h2): (u32, u32) = (parse(h1, "h1")?, parse(h2, "h2")?);
                let st = self.current()?;
                let value = self.pool.lock_file(&st).get_block(h1, h2);
                Ok(format!("{value}"))
            }
            "SET" => {
                let (Some(h1), Some(h2), Some(value)) = (args.next(), args.next(), args.next())
                else {
                    bail!("usage: SET h1 h2 value");
                };
                let (h1, h2, value): (u32, u32, f64) =
                    (parse(h1, "h1")?, parse(h2, "h2")?, parse(value, "value")?);
                let st = self.current()?;
                let outcome = self.pool.lock_file(&st).set_block(h1, h2, value)?;
                Ok(match outcome {
                    SetOutcome::Inserted => "OK".to_string(),
                    SetOutcome::Updated => "OK (updated)".to_string(),
                    SetOutcome::Evicted(old) => {
                        format!("OK (evicted {} {} {})", old.hash1, old.hash2, old.value)
                    }
                })
            }
            "SECTION" => {
                let st = self.current()?;
                let mut f = self.pool.lock_file(&st);
                match args.next() {
                    None => Ok(section_label(f.get_section())),
                    Some(section) => {
                        let code = section_code(section)?;
                        if f.set_section(code, true) {
                            Ok("OK".to_string())
                        } else {
                            bail!("no such section: {section}")
                        }
                    }
                }
            }
            "ADDSECTION" => {
                let (Some(section), Some(length)) = (args.next(), args.next()) else {
                    bail!("usage: ADDSECTION section length");
                };
                let code = section_code(section)?;
                let length: u64 = parse(length, "length")?;
                let st = self.current()?;
                self.pool.lock_file(&st).add_section(code, length)?;
                Ok("OK".to_string())
            }
            "SECTIONS" => {
                let st = self.current()?;
                let sections = self.pool.lock_file(&st).sections();
                let mut out = String::new();
                for sec in &sections {
                    writeln!(out, "{} length={}", section_label(sec.code), sec.length)?;
                }
                write!(out, "({} sections)", sections.len())?;
                Ok(out)
            }
            "REV" => {
                let st = self.current()?;
                let (revision, time) = self.pool.lock_file(&st).revision()?;
                Ok(format!("revision={revision} time={time}"))
            }
            "SETREV" => {
                let (Some(revision), Some(time)) = (args.next(), args.next()) else {
                    bail!("usage: SETREV revision time");
                };
                let (revision, time): (u64, u64) =
                    (parse(revision, "revision")?, parse(time, "time")?);
                let st = self.current()?;
                self.pool.lock_file(&st).set_revision(revision, time)?;
                Ok("OK".to_string())
            }
            "INCREV" => {
                let st = self.current()?;
                let revision = self.pool.lock_file(&st).inc_revision()?;
                Ok(format!("revision={revision}"))
            }
            "STATS" => {
                let mut out = format!("{:?}", self.pool);
                if let Some(st) = &self.current {
                    write!(out, "\n{:?}", *self.pool.lock_file(st))?;
                }
                Ok(out)
            }
            "FLUSH" => {
                let flushed = self.pool.invalidate();
                Ok(format!("OK ({flushed} files)"))
            }
            "CLOSE" => {
                let st = self
                    .current
                    .take()
                    .ok_or_else(|| anyhow!("no statfile selected"))?;
                self.pool.close(&st)?;
                Ok("OK".to_string())
            }
            "BLOOM" => {
                let (Some(op), Some(token)) = (args.next(), args.next()) else {
                    bail!("usage: BLOOM ADD|DEL|CHECK token");
                };
                match op.to_uppercase().as_str() {
                    "ADD" => {
                        self.bloom.add(token.as_bytes());
                        Ok("OK".to_string())
                    }
                    "DEL" => {
                        self.bloom.del(token.as_bytes());
                        Ok("OK".to_string())
                    }
                    "CHECK" => Ok(if self.bloom.check(token.as_bytes()) {
                        "yes".to_string()
                    } else {
                        "no".to_string()
                    }),
                    other => bail!("unknown bloom operation: {other}"),
                }
            }
            other => bail!("unknown command: {other}"),
        }
    }

    fn current(&self) -> Result<Arc<Statfile>> {
        self.current
            .clone()
            .ok_or_else(|| anyhow!("no statfile selected (use OPEN or USE)"))
    }

    /// One-line summary of the current statfile.
    fn describe(&self) -> Result<String> {
        let st = self.current()?;
        let mut f = self.pool.lock_file(&st);
        Ok(format!(
            "OK {} (blocks={}, used={}, section={})",
            st.path().display(),
            f.total_blocks()?,
            f.used_blocks()?,
            section_label(f.get_section())
        ))
    }
}

fn parse<T: FromStr>(raw: &str, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .with_context(|| format!("invalid {what}: {raw}"))
}

/// A section given by name (`url`) or numeric code (`3`).
fn section_code(raw: &str) -> Result<u64> {
    match section_code_by_name(raw) {
        Some(code) => Ok(code),
        None => parse(raw, "section"),
    }
}

fn section_label(code: u64) -> String {
    match section_name(code) {
        Some(name) => name.to_string(),
        None => code.to_string(),
    }
}
