use crate::core::config::data::Config;

impl Config {
    /// Model configured for `provider`. Keys are matched case-insensitively.
    pub fn get_default_model(&self, provider: &str) -> Option<&String> {
        self.default_models
            .get(&provider.to_lowercase())
            .or_else(|| self.default_models.get(provider))
            .or_else(|| {
                self.default_models
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(provider))
                    .map(|(_, model)| model)
            })
    }
}
