/// Decides which URLs may own an activity record. Pages served under a browser's own schemes
/// (settings, extensions, devtools, new tab) are never tracked.
#[derive(Debug, Clone)]
pub struct TrackableFilter {
    privileged_schemes: Vec<String>,
}

impl TrackableFilter {
    pub fn new(privileged_schemes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            privileged_schemes: privileged_schemes
                .into_iter()
                .map(|v| v.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// URLs without a scheme (blank tabs still loading) are not trackable either.
    pub fn is_trackable(&self, url: &str) -> bool {
        match url.trim().split_once(':') {
            Some((scheme, _)) if !scheme.is_empty() => {
                let scheme = scheme.to_ascii_lowercase();
                !self.privileged_schemes.iter().any(|v| *v == scheme)
            }
            _ => false,
        }
    }
}

impl Default for TrackableFilter {
    fn default() -> Self {
        Self::new(crate::utils::config::DEFAULT_PRIVILEGED_SCHEMES.iter().copied())
    }
}
