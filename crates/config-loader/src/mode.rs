/// Which backend the CLI talks to, selected with `RAILWAY_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvMode {
    #[default]
    Production,
    Develop,
    Staging,
}

impl EnvMode {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("RAILWAY_ENV").ok().as_deref())
    }

    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("develop") => EnvMode::Develop,
            Some("staging") => EnvMode::Staging,
            _ => EnvMode::Production,
        }
    }

    pub fn config_file_name(self) -> &'static str {
        match self {
            EnvMode::Production => "config.json",
            EnvMode::Develop => "config-dev.json",
            EnvMode::Staging => "config-staging.json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes() {
        assert_eq!(EnvMode::parse(Some("develop")), EnvMode::Develop);
        assert_eq!(EnvMode::parse(Some("staging")), EnvMode::Staging);
        assert_eq!(EnvMode::parse(Some("prod")), EnvMode::Production);
        assert_eq!(EnvMode::parse(None), EnvMode::Production);
    }

    #[test]
    fn file_name_per_mode() {
        assert_eq!(EnvMode::Production.config_file_name(), "config.json");
        assert_eq!(EnvMode::Develop.config_file_name(), "config-dev.json");
        assert_eq!(EnvMode::Staging.config_file_name(), "config-staging.json");
    }
}
