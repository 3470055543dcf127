#[cfg(test)]
use crate::core::client::ChatClient;
#[cfg(test)]
use crate::core::config::Config;

#[cfg(test)]
pub fn create_test_config() -> Config {
    Config {
        base_url: Some("https://chat.test/api".to_string()),
        ..Config::default()
    }
}

#[cfg(test)]
pub fn create_test_client() -> ChatClient {
    ChatClient::new(create_test_config())
}
