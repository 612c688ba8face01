use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::debug;

use cx_domain::ChannelUrl;

use crate::config::Config;

/// Nesting limit for `defaults` / `system` / alias expansion.
pub const MAX_CHANNEL_DEPTH: usize = 16;

const DEFAULTS_TOKEN: &str = "defaults";
const SYSTEM_TOKEN: &str = "system";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("`system` cannot be used in {}", path.display())]
    SystemInRc { path: PathBuf },
    #[error("channel `{token}` expands more than {limit} levels deep; check the channel configuration for cycles")]
    ExpansionTooDeep { token: String, limit: usize },
}

/// Rewrites the configured channel alias, e.g. to embed an access token.
pub trait AliasRewriter: Send + Sync {
    fn rewrite(&self, alias: &str) -> String;
}

impl<T: AliasRewriter + ?Sized> AliasRewriter for &T {
    fn rewrite(&self, alias: &str) -> String {
        (**self).rewrite(alias)
    }
}

/// Leaves the alias untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRewrite;

impl AliasRewriter for NoRewrite {
    fn rewrite(&self, alias: &str) -> String {
        alias.to_string()
    }
}

/// Points the alias at an anaconda.org-style API domain and appends the
/// user's token as a `t/<token>/` path segment.
#[derive(Debug, Clone, Default)]
pub struct AnacondaTokenRewriter {
    domain: Option<String>,
    token: Option<String>,
}

impl AnacondaTokenRewriter {
    pub fn new(domain: Option<String>, token: Option<String>) -> Self {
        Self { domain, token }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.anaconda_domain.clone(), config.anaconda_token.clone())
    }
}

impl AliasRewriter for AnacondaTokenRewriter {
    fn rewrite(&self, alias: &str) -> String {
        let Some(domain) = &self.domain else {
            debug!("no anaconda domain configured; keeping channel alias");
            return alias.to_string();
        };
        let mut rewritten = domain.replace("api", "conda");
        if !rewritten.ends_with('/') {
            rewritten.push('/');
        }
        if let Some(token) = self.token.as_deref().filter(|token| !token.is_empty()) {
            rewritten.push_str("t/");
            rewritten.push_str(token);
            rewritten.push('/');
        }
        rewritten
    }
}

/// Expands channel tokens into per-platform index URLs.
pub struct ChannelResolver<'a> {
    config: &'a Config,
    rewriter: Box<dyn AliasRewriter + 'a>,
    alias: OnceLock<String>,
}

impl std::fmt::Debug for ChannelResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelResolver")
            .field("subdir", &self.config.subdir)
            .field("alias", &self.alias.get())
            .finish_non_exhaustive()
    }
}

impl<'a> ChannelResolver<'a> {
    /// Resolver whose alias rewriting follows `add_anaconda_token`.
    pub fn new(config: &'a Config) -> Self {
        if config.add_anaconda_token {
            Self::with_rewriter(config, AnacondaTokenRewriter::from_config(config))
        } else {
            Self::with_rewriter(config, NoRewrite)
        }
    }

    pub fn with_rewriter(config: &'a Config, rewriter: impl AliasRewriter + 'a) -> Self {
        Self {
            config,
            rewriter: Box::new(rewriter),
            alias: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        self.config
    }

    /// Channel alias after rewriting. Computed on first use, then reused.
    pub fn channel_alias(&self) -> &str {
        self.alias.get_or_init(|| {
            let mut alias = self.rewriter.rewrite(&self.config.channel_alias);
            if !alias.ends_with('/') {
                alias.push('/');
            }
            debug!(%alias, "resolved channel alias");
            alias
        })
    }

    /// Expand `tokens` in order. `platform` defaults to the configured subdir.
    ///
    /// # Errors
    /// Fails when `system` expands into an rc channel list that itself names
    /// `system`, or when expansion nests deeper than [`MAX_CHANNEL_DEPTH`].
    pub fn normalize<S: AsRef<str>>(
        &self,
        tokens: &[S],
        platform: Option<&str>,
    ) -> Result<Vec<ChannelUrl>, ChannelError> {
        let platform = platform.unwrap_or(&self.config.subdir);
        let mut urls = Vec::new();
        self.expand_into(tokens, platform, 0, &mut urls)?;
        Ok(urls)
    }

    /// The configured search list: the rc `channels` when set, otherwise the
    /// default channels.
    pub fn channel_urls(&self, platform: Option<&str>) -> Result<Vec<ChannelUrl>, ChannelError> {
        match &self.config.rc_channels {
            Some(_) => self.normalize(self.rc_channels()?, platform),
            None => self.normalize(&self.config.default_channels, platform),
        }
    }

    fn expand_into<S: AsRef<str>>(
        &self,
        tokens: &[S],
        platform: &str,
        depth: usize,
        urls: &mut Vec<ChannelUrl>,
    ) -> Result<(), ChannelError> {
        for token in tokens {
            let token: &str = token.as_ref();
            if depth >= MAX_CHANNEL_DEPTH {
                return Err(ChannelError::ExpansionTooDeep {
                    token: token.to_string(),
                    limit: MAX_CHANNEL_DEPTH,
                });
            }
            match token {
                DEFAULTS_TOKEN => {
                    self.expand_into(&self.config.default_channels, platform, depth + 1, urls)?;
                }
                SYSTEM_TOKEN => {
                    let channels = if self.config.rc_path.is_some() {
                        self.rc_channels()?
                    } else {
                        self.config.default_channels.as_slice()
                    };
                    self.expand_into(channels, platform, depth + 1, urls)?;
                }
                name if !is_url(name) => {
                    let aliased = [format!("{}{name}", self.channel_alias())];
                    self.expand_into(&aliased, platform, depth + 1, urls)?;
                }
                url => urls.extend(ChannelUrl::expand(url, platform)),
            }
        }
        Ok(())
    }

    fn rc_channels(&self) -> Result<&[String], ChannelError> {
        let channels = self.config.rc_channels.as_deref().unwrap_or_default();
        if channels.iter().any(|channel| channel == SYSTEM_TOKEN) {
            return Err(ChannelError::SystemInRc {
                path: self.config.rc_path.clone().unwrap_or_default(),
            });
        }
        Ok(channels)
    }
}

/// True when `token` starts with a URL scheme (`<alpha>[alnum+.-]*:`).
pub fn is_url(token: &str) -> bool {
    let Some((scheme, _)) = token.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::for_root("/opt/cx");
        config.subdir = "linux-64".into();
        config.default_channels = vec![
            "https://repo.example/pkgs/free".into(),
            "https://repo.example/pkgs/pro/".into(),
        ];
        config
    }

    fn strings(urls: &[ChannelUrl]) -> Vec<&str> {
        urls.iter().map(ChannelUrl::as_str).collect()
    }

    #[test]
    fn full_url_expands_to_platform_and_noarch() {
        let config = config();
        let resolver = ChannelResolver::new(&config);
        let urls = resolver
            .normalize(&["https://repo.example/x/"], Some("osx-64"))
            .unwrap();
        assert_eq!(
            strings(&urls),
            ["https://repo.example/x/osx-64/", "https://repo.example/x/noarch/"]
        );
    }

    #[test]
    fn defaults_matches_default_channel_list() {
        let config = config();
        let resolver = ChannelResolver::new(&config);
        for platform in ["linux-64", "win-32"] {
            assert_eq!(
                resolver.normalize(&["defaults"], Some(platform)).unwrap(),
                resolver
                    .normalize(&config.default_channels, Some(platform))
                    .unwrap()
            );
        }
        assert_eq!(
            strings(&resolver.normalize(&["defaults"], None).unwrap()),
            [
                "https://repo.example/pkgs/free/linux-64/",
                "https://repo.example/pkgs/free/noarch/",
                "https://repo.example/pkgs/pro/linux-64/",
                "https://repo.example/pkgs/pro/noarch/",
            ]
        );
    }

    #[test]
    fn bare_names_use_the_channel_alias() {
        let mut config = config();
        config.channel_alias = "https://mirror.example".into();
        let resolver = ChannelResolver::new(&config);
        let urls = resolver.normalize(&["conda-forge"], None).unwrap();
        assert_eq!(
            strings(&urls),
            [
                "https://mirror.example/conda-forge/linux-64/",
                "https://mirror.example/conda-forge/noarch/"
            ]
        );
    }

    #[test]
    fn order_is_preserved_and_duplicates_kept() {
        let config = config();
        let resolver = ChannelResolver::new(&config);
        let urls = resolver
            .normalize(&["file:///srv/local", "defaults", "file:///srv/local"], None)
            .unwrap();
        assert_eq!(urls.len(), 8);
        assert_eq!(urls[0], "file:///srv/local/linux-64/");
        assert_eq!(urls[2], "https://repo.example/pkgs/free/linux-64/");
        assert_eq!(urls[6], urls[0]);
        assert!(resolver.normalize::<&str>(&[], None).unwrap().is_empty());
    }

    #[test]
    fn system_without_rc_uses_defaults() {
        let config = config();
        let resolver = ChannelResolver::new(&config);
        assert_eq!(
            resolver.normalize(&["system"], None).unwrap(),
            resolver.normalize(&["defaults"], None).unwrap()
        );
    }

    #[test]
    fn system_with_rc_uses_rc_channels() {
        let mut config = config();
        config.rc_path = Some("/home/u/.condarc".into());
        config.rc_channels = Some(vec!["file:///srv/rc".into()]);
        {
            let resolver = ChannelResolver::new(&config);
            assert_eq!(
                strings(&resolver.normalize(&["system"], None).unwrap()),
                ["file:///srv/rc/linux-64/", "file:///srv/rc/noarch/"]
            );
        }

        config.rc_channels = None;
        let resolver = ChannelResolver::new(&config);
        assert!(resolver.normalize(&["system"], None).unwrap().is_empty());
    }

    #[test]
    fn system_inside_rc_channels_is_rejected() {
        let mut config = config();
        config.rc_path = Some("/home/u/.condarc".into());
        config.rc_channels = Some(vec!["defaults".into(), "system".into()]);
        let resolver = ChannelResolver::new(&config);
        assert_eq!(
            resolver.normalize(&["system"], None),
            Err(ChannelError::SystemInRc {
                path: "/home/u/.condarc".into()
            })
        );
        assert!(resolver.channel_urls(None).is_err());
    }

    #[test]
    fn cyclic_configuration_hits_depth_limit() {
        let mut config = config();
        config.default_channels = vec!["system".into()];
        let resolver = ChannelResolver::new(&config);
        assert!(matches!(
            resolver.normalize(&["defaults"], None),
            Err(ChannelError::ExpansionTooDeep { .. })
        ));

        let mut config = self::config();
        config.channel_alias = "not-a-url/".into();
        let resolver = ChannelResolver::new(&config);
        assert!(matches!(
            resolver.normalize(&["foo"], None),
            Err(ChannelError::ExpansionTooDeep { .. })
        ));
    }

    #[test]
    fn channel_urls_prefers_rc_channels() {
        let mut config = config();
        assert_eq!(
            resolver_urls(&config),
            strings(&ChannelResolver::new(&config).normalize(&["defaults"], None).unwrap())
        );
        config.rc_channels = Some(vec!["file:///srv/rc".into()]);
        assert_eq!(
            resolver_urls(&config),
            ["file:///srv/rc/linux-64/", "file:///srv/rc/noarch/"]
        );
    }

    fn resolver_urls(config: &Config) -> Vec<String> {
        ChannelResolver::new(config)
            .channel_urls(None)
            .unwrap()
            .into_iter()
            .map(|url| url.as_str().to_string())
            .collect()
    }

    struct CountingRewriter(std::sync::atomic::AtomicUsize);

    impl AliasRewriter for CountingRewriter {
        fn rewrite(&self, alias: &str) -> String {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            format!("{alias}t/secret/")
        }
    }

    #[test]
    fn alias_rewrite_runs_once() {
        let config = config();
        let rewriter = CountingRewriter(std::sync::atomic::AtomicUsize::new(0));
        let resolver = ChannelResolver::with_rewriter(&config, &rewriter);
        let urls = resolver.normalize(&["a", "b"], None).unwrap();
        assert_eq!(urls[0], "https://conda.anaconda.org/t/secret/a/linux-64/");
        assert_eq!(urls[2], "https://conda.anaconda.org/t/secret/b/linux-64/");
        assert_eq!(rewriter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn anaconda_rewriter_embeds_token() {
        let rewriter = AnacondaTokenRewriter::new(
            Some("https://api.anaconda.example".into()),
            Some("abc".into()),
        );
        assert_eq!(
            rewriter.rewrite("https://conda.anaconda.org/"),
            "https://conda.anaconda.example/t/abc/"
        );
        assert_eq!(
            AnacondaTokenRewriter::default().rewrite("https://x.example/"),
            "https://x.example/"
        );
    }

    #[test]
    fn scheme_detection() {
        assert!(is_url("https://repo.example"));
        assert!(is_url("file:///tmp/channel"));
        assert!(!is_url("conda-forge"));
        assert!(!is_url("user/label/dev"));
        assert!(!is_url(":nothing"));
    }
}
