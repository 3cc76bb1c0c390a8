use bitquote_core::config::{AppConfig, LoadOptions};

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    render(&config)
}

fn render(config: &AppConfig) -> String {
    let lines = [
        "effective config (source precedence: overrides > env > file > default):".to_string(),
        format!("database.url = {}", config.database.url),
        format!("database.max_connections = {}", config.database.max_connections),
        format!("database.timeout_secs = {}", config.database.timeout_secs),
        format!("server.bind_address = {}", config.server.bind_address),
        format!("server.port = {}", config.server.port),
        format!("server.graceful_shutdown_secs = {}", config.server.graceful_shutdown_secs),
        format!("pricing.tax_rate = {}", config.pricing.tax_rate),
        format!("approval.max_auto_discount_pct = {}", config.approval.max_auto_discount_pct),
        format!("approval.max_auto_total = {}", config.approval.max_auto_total),
        format!("logging.level = {}", config.logging.level),
        format!("logging.format = {:?}", config.logging.format),
    ];

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use bitquote_core::config::AppConfig;

    use super::render;

    #[test]
    fn render_lists_every_section() {
        let rendered = render(&AppConfig::default());

        for key in [
            "database.url",
            "server.port",
            "pricing.tax_rate",
            "approval.max_auto_discount_pct",
            "logging.level",
        ] {
            assert!(rendered.contains(key), "missing `{key}` in:\n{rendered}");
        }
    }
}
