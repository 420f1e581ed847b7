//! Stand-in server for exercising the harness without a real Redis build.
//!
//! Accepts redis-server style flags (`--port`, `--save`, `--dbfilename`, ...),
//! speaks RESP, and keeps string keys in memory. `SAVE` writes them to the
//! dump file as JSON; `DEBUG RELOAD` saves, clears and loads them back.
//!
//! Fault injection for harness tests:
//!   --crash-on-start <code>   exit with <code> before listening
//!   --fail-reload yes         answer DEBUG RELOAD with an error
//!   --fail-save yes           answer SAVE with an error, writing nothing
//!
//! Usage:
//!   stub-redis --port 7000 --save "" --dbfilename dump.7000.rdb

use disposable_redis::resp::{read_value, write_value, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const DUMP_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct DumpFile {
    version: u32,
    entries: BTreeMap<String, String>,
}

struct Store {
    entries: BTreeMap<String, String>,
    dump_path: PathBuf,
    fail_reload: bool,
    fail_save: bool,
}

impl Store {
    fn save(&self) -> Result<(), String> {
        let dump = DumpFile {
            version: DUMP_VERSION,
            entries: self.entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&dump).map_err(|e| e.to_string())?;
        std::fs::write(&self.dump_path, bytes).map_err(|e| e.to_string())
    }

    fn load(&mut self) -> Result<(), String> {
        let bytes = std::fs::read(&self.dump_path).map_err(|e| e.to_string())?;
        let dump: DumpFile = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
        if dump.version != DUMP_VERSION {
            return Err(format!("unsupported dump version {}", dump.version));
        }
        self.entries = dump.entries;
        Ok(())
    }
}

/// Split `--key v1 v2 --other` into a map of flag -> values.
fn parse_options<I>(args: I) -> HashMap<String, Vec<String>>
where
    I: IntoIterator<Item = String>,
{
    let mut options: HashMap<String, Vec<String>> = HashMap::new();
    let mut current: Option<String> = None;
    for arg in args {
        if let Some(key) = arg.strip_prefix("--") {
            options.entry(key.to_string()).or_default();
            current = Some(key.to_string());
        } else if let Some(key) = &current {
            options.entry(key.clone()).or_default().push(arg);
        }
    }
    options
}

fn first_value<'a>(options: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    options.get(key).and_then(|v| v.first()).map(String::as_str)
}

fn main() {
    let options = parse_options(std::env::args().skip(1));

    if let Some(code) = first_value(&options, "crash-on-start") {
        println!("# Crash requested at startup");
        std::process::exit(code.parse().unwrap_or(1));
    }

    let port: u16 = match first_value(&options, "port").unwrap_or("6379").parse() {
        Ok(port) => port,
        Err(e) => {
            eprintln!("# Invalid --port: {}", e);
            std::process::exit(1);
        }
    };
    let dump_path = PathBuf::from(first_value(&options, "dbfilename").unwrap_or("dump.rdb"));
    if let Some(modules) = options.get("loadmodule") {
        println!("# Module loading not supported, ignoring {:?}", modules);
    }

    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("# Could not bind 127.0.0.1:{}: {}", port, e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(Mutex::new(Store {
        entries: BTreeMap::new(),
        dump_path,
        fail_reload: first_value(&options, "fail-reload") == Some("yes"),
        fail_save: first_value(&options, "fail-save") == Some("yes"),
    }));

    println!("* Ready to accept connections on port {}", port);
    let _ = std::io::stdout().flush();

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let store = Arc::clone(&store);
                std::thread::spawn(move || serve(stream, store));
            }
            Err(e) => eprintln!("# Accept failed: {}", e),
        }
    }
}

fn serve(stream: TcpStream, store: Arc<Mutex<Store>>) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(stream);

    loop {
        let reply = match read_value(&mut reader) {
            Ok(Some(Value::Array(Some(items)))) => {
                let args: Vec<String> = items.iter().filter_map(Value::as_text).collect();
                if args.len() != items.len() || args.is_empty() {
                    Value::Error("ERR Protocol error: expected bulk strings".to_string())
                } else {
                    let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
                    dispatch(&mut store, &args)
                }
            }
            Ok(Some(_)) => Value::Error("ERR Protocol error: expected array".to_string()),
            Ok(None) | Err(_) => return,
        };

        if write_value(&mut writer, &reply).is_err() || writer.flush().is_err() {
            return;
        }
    }
}

fn dispatch(store: &mut Store, args: &[String]) -> Value {
    let command = args[0].to_ascii_uppercase();
    let rest = &args[1..];

    match (command.as_str(), rest) {
        ("PING", []) => Value::Simple("PONG".to_string()),
        ("PING", [message]) | ("ECHO", [message]) => Value::bulk(message.as_bytes()),
        ("SET", [key, value]) => {
            store.entries.insert(key.clone(), value.clone());
            Value::ok()
        }
        ("GET", [key]) => match store.entries.get(key) {
            Some(value) => Value::bulk(value.as_bytes()),
            None => Value::Bulk(None),
        },
        ("DEL", keys) | ("EXISTS", keys) if !keys.is_empty() => {
            let mut count = 0;
            for key in keys {
                let hit = if command == "DEL" {
                    store.entries.remove(key).is_some()
                } else {
                    store.entries.contains_key(key)
                };
                if hit {
                    count += 1;
                }
            }
            Value::Integer(count)
        }
        ("DBSIZE", []) => Value::Integer(store.entries.len() as i64),
        ("FLUSHALL", []) => {
            store.entries.clear();
            Value::ok()
        }
        ("SAVE", []) if store.fail_save => {
            println!("# Refusing SAVE (--fail-save)");
            Value::Error("ERR Background save already in progress".to_string())
        }
        ("SAVE", []) => match store.save() {
            Ok(()) => {
                println!("* DB saved on disk");
                Value::ok()
            }
            Err(e) => Value::Error(format!("ERR {}", e)),
        },
        ("DEBUG", [sub]) if sub.eq_ignore_ascii_case("RELOAD") => {
            if store.fail_reload {
                println!("# Refusing DEBUG RELOAD (--fail-reload)");
                return Value::Error("ERR Error trying to load the RDB dump".to_string());
            }
            let reloaded = store.save().and_then(|()| {
                store.entries.clear();
                store.load()
            });
            match reloaded {
                Ok(()) => {
                    println!("* DB reloaded by DEBUG RELOAD");
                    Value::ok()
                }
                Err(e) => Value::Error(format!("ERR Error trying to load the RDB dump: {}", e)),
            }
        }
        _ => Value::Error(format!(
            "ERR unknown command or wrong number of arguments for '{}'",
            args[0]
        )),
    }
}
