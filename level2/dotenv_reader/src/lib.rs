use std::collections::HashMap;
use std::path::Path;

/// anything that can answer "what is the value of this variable".
pub trait EnvSource {
    fn lookup(&self, name: &str) -> Option<String>;

    /// value of `name`, or an empty string when it is missing.
    fn get_env(&self, name: &str) -> String {
        self.lookup(name).unwrap_or_default()
    }
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// parses `KEY=value` lines. Blank lines and `#` comments are skipped,
/// an optional `export ` prefix is dropped, and matching surrounding
/// quotes are stripped from the value.
pub fn parse_dotenv(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, val)) = line.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let val = val.trim();
            let unquoted = ['"', '\'']
                .iter()
                .find_map(|q| val.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
                .unwrap_or(val);
            map.insert(key.to_string(), unquoted.to_string());
        }
    }
    map
}

/// reads a .env file. A missing file is not an error.
pub fn load_dotenv(path: &Path) -> Result<Option<HashMap<String, String>>, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(parse_dotenv(&contents))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(format!("Failed to load .env file {:?}: {}", path, e)),
    }
}

/// sources are consulted in order, first hit wins.
#[derive(Default)]
pub struct LayeredEnv {
    layers: Vec<Box<dyn EnvSource>>,
}

impl LayeredEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: impl EnvSource + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }
}

impl EnvSource for LayeredEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        self.layers.iter().find_map(|l| l.lookup(name))
    }
}

pub mod dotenv_reader {
    use std::path::PathBuf;

    use super::{load_dotenv, LayeredEnv, ProcessEnv};

    #[derive(Default)]
    pub struct Input {
        /// the path to your .env file.
        /// relative paths are resolved from the current directory.
        pub dotenv_path: PathBuf,
    }

    /// process environment first, then the .env file if there is one.
    /// this matches dotenv semantics of never overriding a variable
    /// that is already set.
    pub fn config(input: &Input) -> Result<LayeredEnv, String> {
        let env = LayeredEnv::new().with_layer(ProcessEnv);
        match load_dotenv(&input.dotenv_path)? {
            Some(values) => {
                tracing::debug!(path = ?input.dotenv_path, count = values.len(), "loaded .env file");
                Ok(env.with_layer(values))
            }
            None => Ok(env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_quotes_and_exports() {
        let map = parse_dotenv("# comment\n\nPROJECT_NAME=acme\nexport STAGE=\"prod\"\nDOMAIN_NAME='acme.com'\n=nokey\nBROKEN\nEMPTY=\n");
        assert_eq!(map.get("PROJECT_NAME").map(String::as_str), Some("acme"));
        assert_eq!(map.get("STAGE").map(String::as_str), Some("prod"));
        assert_eq!(map.get("DOMAIN_NAME").map(String::as_str), Some("acme.com"));
        assert_eq!(map.get("EMPTY").map(String::as_str), Some(""));
        assert!(!map.contains_key("BROKEN"));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn values_keep_inner_equals_signs() {
        let map = parse_dotenv("CONNECTION_ARN=arn:aws:codestar-connections:x:1:connection/a=b");
        assert_eq!(map.get("CONNECTION_ARN").map(String::as_str), Some("arn:aws:codestar-connections:x:1:connection/a=b"));
    }

    #[test]
    fn first_layer_wins() {
        let first: HashMap<String, String> = [("A".to_string(), "1".to_string())].into();
        let second: HashMap<String, String> = [("A".to_string(), "2".to_string()), ("B".to_string(), "3".to_string())].into();
        let env = LayeredEnv::new().with_layer(first).with_layer(second);
        assert_eq!(env.get_env("A"), "1");
        assert_eq!(env.get_env("B"), "3");
        assert_eq!(env.get_env("C"), "");
    }

    #[test]
    fn missing_dotenv_file_is_fine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dotenv_reader::Input { dotenv_path: dir.path().join("nope.env") };
        assert!(dotenv_reader::config(&input).is_ok());
    }

    #[test]
    fn dotenv_file_is_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".env");
        std::fs::write(&path, "DEMO_CDK_DOTENV_TEST_ONLY=from-file\n").expect("write");
        let env = dotenv_reader::config(&dotenv_reader::Input { dotenv_path: path }).expect("loads");
        assert_eq!(env.get_env("DEMO_CDK_DOTENV_TEST_ONLY"), "from-file");
    }
}
