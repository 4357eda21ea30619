use crate::client::{DEFAULT_API_URL, DEFAULT_MODEL};
use crate::error::VeoError;
use crate::poll::PollOptions;
use std::env;
use std::path::{Path, PathBuf};
use url::Url;

/// Values supplied explicitly, e.g. on the command line or in a proxy request.
/// Anything left `None` falls back to the environment and then to defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub model: Option<String>,
    pub base_path: Option<PathBuf>,
    pub save_path: Option<PathBuf>,
    pub public_base_url: Option<String>,
    pub poll: Option<PollOptions>,
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.api_base_url.is_none()
            && self.model.is_none()
            && self.base_path.is_none()
            && self.save_path.is_none()
            && self.public_base_url.is_none()
            && self.poll.is_none()
    }

    /// Layers `other` on top of `self`; fields set in `other` win.
    pub fn merge(&self, other: &ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            api_key: other.api_key.clone().or_else(|| self.api_key.clone()),
            api_base_url: other.api_base_url.clone().or_else(|| self.api_base_url.clone()),
            model: other.model.clone().or_else(|| self.model.clone()),
            base_path: other.base_path.clone().or_else(|| self.base_path.clone()),
            save_path: other.save_path.clone().or_else(|| self.save_path.clone()),
            public_base_url: other
                .public_base_url
                .clone()
                .or_else(|| self.public_base_url.clone()),
            poll: other.poll.or(self.poll),
        }
    }
}

/// Everything the generator needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_base_url: Url,
    pub model: String,
    /// Root that public video URLs are computed relative to.
    pub base_path: PathBuf,
    /// Where relative image paths are resolved.
    pub media_dir: PathBuf,
    /// Where videos are cached.
    pub video_dir: PathBuf,
    pub public_base_url: Option<String>,
    pub poll: PollOptions,
}

impl Config {
    /// Resolves configuration from `overrides` and the process environment.
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self, VeoError> {
        Self::resolve_with(overrides, |name| env::var(name).ok())
    }

    /// Like [`Config::resolve`], reading variables through `lookup`.
    ///
    /// | Setting          | Sources, in order                                              |
    /// |------------------|----------------------------------------------------------------|
    /// | API key          | override, `GEMINI_API_KEY`                                     |
    /// | API base URL     | override, `GOOGLE_API_DOMAIN`, production endpoint             |
    /// | Model            | override, `VEO_MODEL`, `veo-3.1-generate-preview`              |
    /// | Base path        | override, `VIDEO_BASE_PATH`, `MAGENTO_BASE_PATH`, current dir  |
    /// | Video directory  | override, `VIDEO_SAVE_PATH`, `<base>/pub/media/video`          |
    /// | Public base URL  | override, `VIDEO_BASE_URL`, `MAGENTO_BASE_URL`, `BASE_URL`, `HTTP_HOST`/`SERVER_NAME` |
    pub fn resolve_with<F>(overrides: &ConfigOverrides, lookup: F) -> Result<Self, VeoError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_key = overrides
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| var("GEMINI_API_KEY"))
            .ok_or(VeoError::MissingApiKey)?;

        let api_base_url = overrides
            .api_base_url
            .clone()
            .or_else(|| var("GOOGLE_API_DOMAIN"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_base_url = parse_base_url(&api_base_url)?;

        let model = overrides
            .model
            .clone()
            .or_else(|| var("VEO_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_path = match overrides
            .base_path
            .clone()
            .or_else(|| var("VIDEO_BASE_PATH").map(PathBuf::from))
            .or_else(|| var("MAGENTO_BASE_PATH").map(PathBuf::from))
        {
            Some(path) => std::path::absolute(path)?,
            None => env::current_dir()?,
        };

        let video_dir = match overrides
            .save_path
            .clone()
            .or_else(|| var("VIDEO_SAVE_PATH").map(PathBuf::from))
        {
            Some(path) => under(&base_path, path),
            None => base_path.join("pub").join("media").join("video"),
        };
        let media_dir = base_path.join("pub").join("media");

        let public_base_url = overrides
            .public_base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .or_else(|| detect_public_base_url(&var));

        Ok(Self {
            api_key,
            api_base_url,
            model,
            base_path,
            media_dir,
            video_dir,
            public_base_url,
            poll: overrides.poll.unwrap_or_default(),
        })
    }
}

fn under(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, VeoError> {
    let trimmed = raw.trim_end_matches('/');
    Url::parse(&format!("{trimmed}/"))
        .map_err(|err| VeoError::InvalidConfig(format!("invalid API base URL {raw:?}: {err}")))
}

/// Finds a public base URL in the environment.
///
/// Store-code segments such as `/default/` are collapsed, and a bare host from
/// `HTTP_HOST`/`SERVER_NAME` is used as a last resort.
fn detect_public_base_url(var: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let configured = ["VIDEO_BASE_URL", "MAGENTO_BASE_URL", "BASE_URL"]
        .iter()
        .find_map(|&name| var(name));
    if let Some(url) = configured {
        let url = url.replace("/default/", "/");
        return Some(url.trim_end_matches('/').to_string());
    }

    let host = var("HTTP_HOST").or_else(|| var("SERVER_NAME"))?;
    let scheme = if var("HTTPS").as_deref() == Some("on") {
        "https"
    } else {
        "http"
    };
    Some(format!("{scheme}://{host}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let err = Config::resolve_with(&ConfigOverrides::default(), lookup(&[])).unwrap_err();
        assert!(matches!(err, VeoError::MissingApiKey));
    }

    #[test]
    fn overrides_beat_environment() {
        let overrides = ConfigOverrides {
            api_key: Some("from-flag".into()),
            base_path: Some("/srv/shop".into()),
            save_path: Some("media/clips".into()),
            public_base_url: Some("https://cdn.example/".into()),
            ..Default::default()
        };
        let config = Config::resolve_with(
            &overrides,
            lookup(&[
                ("GEMINI_API_KEY", "from-env"),
                ("VIDEO_SAVE_PATH", "/elsewhere"),
                ("MAGENTO_BASE_URL", "https://env.example"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api_key, "from-flag");
        assert_eq!(config.video_dir, PathBuf::from("/srv/shop/media/clips"));
        assert_eq!(config.media_dir, PathBuf::from("/srv/shop/pub/media"));
        assert_eq!(config.public_base_url.as_deref(), Some("https://cdn.example"));
        assert_eq!(config.api_base_url.as_str(), DEFAULT_API_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn environment_defaults_apply() {
        let config = Config::resolve_with(
            &ConfigOverrides::default(),
            lookup(&[
                ("GEMINI_API_KEY", "k"),
                ("MAGENTO_BASE_PATH", "/var/www"),
                ("MAGENTO_BASE_URL", "https://shop.example/default/"),
                ("GOOGLE_API_DOMAIN", "http://localhost:9000/v1beta"),
            ]),
        )
        .unwrap();

        assert_eq!(config.video_dir, PathBuf::from("/var/www/pub/media/video"));
        assert_eq!(config.public_base_url.as_deref(), Some("https://shop.example"));
        assert_eq!(config.api_base_url.as_str(), "http://localhost:9000/v1beta/");
    }

    #[test]
    fn host_fallback_builds_a_base_url() {
        let config = Config::resolve_with(
            &ConfigOverrides::default(),
            lookup(&[
                ("GEMINI_API_KEY", "k"),
                ("HTTP_HOST", "shop.local"),
                ("HTTPS", "on"),
            ]),
        )
        .unwrap();
        assert_eq!(config.public_base_url.as_deref(), Some("https://shop.local"));
    }

    #[test]
    fn no_public_url_without_hints() {
        let config =
            Config::resolve_with(&ConfigOverrides::default(), lookup(&[("GEMINI_API_KEY", "k")]))
                .unwrap();
        assert_eq!(config.public_base_url, None);
    }
}
