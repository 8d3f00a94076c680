use diesel::{ConnectionError, ConnectionResult};
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::ManagerConfig;
use diesel_async::AsyncPgConnection;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rustls::ClientConfig;
use rustls_platform_verifier::ConfigVerifierExt;

use super::StoreError;

pub type DbPool = Pool<AsyncPgConnection>;

pub fn establish_connection(database_url: &str, max_size: usize) -> Result<DbPool, StoreError> {
    let mut config = ManagerConfig::default();
    if requires_tls(database_url) {
        config.custom_setup = Box::new(establish_connection_with_tls);
    }

    let mgr =
        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(database_url, config);

    Pool::builder(mgr)
        .max_size(max_size)
        .build()
        .map_err(|e| StoreError::Pool(e.to_string()))
}

fn requires_tls(database_url: &str) -> bool {
    database_url.contains("sslmode=require") || database_url.contains("sslmode=verify")
}

fn establish_connection_with_tls(config: &str) -> BoxFuture<'_, ConnectionResult<AsyncPgConnection>> {
    let fut = async {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let rustls_config = ClientConfig::with_platform_verifier()
            .map_err(|e| ConnectionError::BadConnection(format!("TLS config error: {}", e)))?;
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(rustls_config);

        // rustls does not support channel binding
        let config_with_no_channel_binding = config.replace("channel_binding=require", "channel_binding=disable");
        let (client, conn) = tokio_postgres::connect(&config_with_no_channel_binding, tls)
            .await
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;

        AsyncPgConnection::try_from_client_and_connection(client, conn).await
    };
    fut.boxed()
}

#[cfg(test)]
mod tests {
    use super::requires_tls;

    #[test]
    fn tls_is_only_set_up_when_the_url_asks_for_it() {
        assert!(requires_tls("postgres://u:p@db/snaps?sslmode=require"));
        assert!(requires_tls("postgres://u:p@db/snaps?sslmode=verify-full"));
        assert!(!requires_tls("postgres://u:p@localhost/snaps"));
    }
}
