use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "10485760")]
    pub max_body_size: usize,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.bind(), "0.0.0.0:8080");
        assert_eq!(config.max_body_size, 10 * 1024 * 1024);
    }

    #[test]
    fn overrides() {
        let env: HashMap<String, String> = [("BIND_HOST", "127.0.0.1"), ("PORT", "9999")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.bind(), "127.0.0.1:9999");
    }
}
