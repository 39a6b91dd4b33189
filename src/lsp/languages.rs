//! 🔧 Language Server Registry
//!
//! Defines how to spawn and initialize the language server for each language
//! tag, and maps file extensions onto tags. Built-in defaults cover
//! rust-analyzer, typescript-language-server, pylsp, gopls, and clangd;
//! the `language_map` config section is merged over the extension table.

use serde_json::{json, Value};
use std::collections::HashMap;

/// 🔧 Language Server Configuration
///
/// Everything needed to spawn and initialize an LSP server for one language.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Canonical language tag (rust, typescript, python, go, c)
    pub language: String,

    /// Server binary name or path
    pub server_command: String,

    /// Command-line arguments
    pub args: Vec<String>,

    /// File extensions this server handles, without the dot
    pub file_extensions: Vec<String>,

    /// LSP initialization options (language-specific settings)
    pub init_options: Option<Value>,
}

impl ServerConfig {
    /// 🦀 rust-analyzer configuration
    pub fn rust_analyzer() -> Self {
        Self {
            language: "rust".to_string(),
            server_command: "rust-analyzer".to_string(),
            args: vec![],
            file_extensions: vec!["rs".to_string()],
            init_options: None,
        }
    }

    /// 🟦 typescript-language-server configuration
    pub fn typescript_language_server() -> Self {
        Self {
            language: "typescript".to_string(),
            server_command: "typescript-language-server".to_string(),
            args: vec!["--stdio".to_string()],
            file_extensions: vec![
                "ts".to_string(),
                "tsx".to_string(),
                "js".to_string(),
                "jsx".to_string(),
                "mjs".to_string(),
            ],
            init_options: None,
        }
    }

    /// 🐍 pylsp (Python Language Server) configuration
    pub fn pylsp() -> Self {
        Self {
            language: "python".to_string(),
            server_command: "pylsp".to_string(),
            args: vec![],
            file_extensions: vec!["py".to_string(), "pyi".to_string()],
            init_options: Some(json!({
                "pylsp": {
                    "plugins": {
                        "pycodestyle": { "enabled": true },
                        "pyflakes": { "enabled": true },
                        "pylint": { "enabled": false }
                    }
                }
            })),
        }
    }

    /// 🐹 gopls configuration
    pub fn gopls() -> Self {
        Self {
            language: "go".to_string(),
            server_command: "gopls".to_string(),
            args: vec![],
            file_extensions: vec!["go".to_string()],
            init_options: None,
        }
    }

    /// ⚙️ clangd configuration
    pub fn clangd() -> Self {
        Self {
            language: "c".to_string(),
            server_command: "clangd".to_string(),
            args: vec![],
            file_extensions: vec![
                "c".to_string(),
                "h".to_string(),
                "cc".to_string(),
                "cpp".to_string(),
                "hpp".to_string(),
            ],
            init_options: None,
        }
    }

    fn builtins() -> Vec<ServerConfig> {
        vec![
            Self::rust_analyzer(),
            Self::typescript_language_server(),
            Self::pylsp(),
            Self::gopls(),
            Self::clangd(),
        ]
    }
}

/// 📚 Registry of server configs plus the extension → language table
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    servers: HashMap<String, ServerConfig>,
    extensions: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Create the registry from built-in defaults
    pub fn new() -> Self {
        let mut servers = HashMap::new();
        let mut extensions = HashMap::new();

        for config in ServerConfig::builtins() {
            for ext in &config.file_extensions {
                extensions.insert(ext.clone(), config.language.clone());
            }
            servers.insert(config.language.clone(), config);
        }

        Self {
            servers,
            extensions,
        }
    }

    /// Merge configured extension → language overrides on top of the builtins
    pub fn with_overrides(language_map: &HashMap<String, String>) -> Self {
        let mut registry = Self::new();
        for (ext, language) in language_map {
            registry
                .extensions
                .insert(ext.trim_start_matches('.').to_string(), language.clone());
        }
        registry
    }

    /// Register (or replace) a server config, claiming its extensions
    pub fn register_server(&mut self, config: ServerConfig) {
        for ext in &config.file_extensions {
            self.extensions
                .insert(ext.trim_start_matches('.').to_string(), config.language.clone());
        }
        self.servers.insert(config.language.clone(), config);
    }

    /// 🔍 Canonical language tag for a file extension (dot optional)
    pub fn language_for_extension(&self, extension: &str) -> Option<&str> {
        self.extensions
            .get(extension.trim_start_matches('.'))
            .map(String::as_str)
    }

    /// Language tag for a path, from its extension
    pub fn language_for_path(&self, path: &str) -> Option<&str> {
        let extension = path.rsplit('.').next()?;
        if extension.len() == path.len() {
            return None; // no dot at all
        }
        self.language_for_extension(extension)
    }

    /// Server config for a language tag
    pub fn server_for_language(&self, language: &str) -> Option<&ServerConfig> {
        self.servers.get(language)
    }

    /// All known language tags (for stats reporting)
    pub fn languages(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_extensions() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.language_for_extension("rs"), Some("rust"));
        assert_eq!(registry.language_for_extension(".ts"), Some("typescript"));
        assert_eq!(registry.language_for_extension("py"), Some("python"));
        assert_eq!(registry.language_for_extension("go"), Some("go"));
        assert_eq!(registry.language_for_extension("unknown"), None);
    }

    #[test]
    fn test_language_for_path() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.language_for_path("/u/P/src/x.ts"), Some("typescript"));
        assert_eq!(registry.language_for_path("src/lib.rs"), Some("rust"));
        assert_eq!(registry.language_for_path("Makefile"), None);
    }

    #[test]
    fn test_overrides_win() {
        let mut map = HashMap::new();
        map.insert("rs".to_string(), "experimental-rust".to_string());
        map.insert(".zig".to_string(), "zig".to_string());

        let registry = LanguageRegistry::with_overrides(&map);
        assert_eq!(registry.language_for_extension("rs"), Some("experimental-rust"));
        assert_eq!(registry.language_for_extension("zig"), Some("zig"));
        // untouched builtins survive
        assert_eq!(registry.language_for_extension("py"), Some("python"));
    }

    #[test]
    fn test_register_server_claims_extensions() {
        let mut registry = LanguageRegistry::new();
        registry.register_server(ServerConfig {
            language: "zig".to_string(),
            server_command: "zls".to_string(),
            args: vec![],
            file_extensions: vec!["zig".to_string()],
            init_options: None,
        });
        assert_eq!(registry.language_for_extension("zig"), Some("zig"));
        assert_eq!(registry.server_for_language("zig").unwrap().server_command, "zls");
    }

    #[test]
    fn test_server_lookup() {
        let registry = LanguageRegistry::new();
        let config = registry.server_for_language("typescript").unwrap();
        assert_eq!(config.server_command, "typescript-language-server");
        assert!(config.args.contains(&"--stdio".to_string()));
        assert!(registry.server_for_language("cobol").is_none());
    }
}
