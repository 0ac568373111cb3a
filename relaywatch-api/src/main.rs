/**
 * RELAYWATCH API - Point d'entrée du serveur de consultation
 *
 * RÔLE : Bootstrap du serveur HTTP lecture seule au-dessus du journal
 * TSV écrit par relaywatch-collector. Charge la config depuis
 * l'environnement, précharge le cache, sert l'API Axum.
 *
 * ARCHITECTURE : Writer (collector) et reader (api) sont des process
 * séparés ; le journal append-only est leur seul point de contact.
 */

mod config;
mod http;
mod logcache;
mod state;

use crate::logcache::LogCache;
use crate::state::new_state;
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    let cfg = config::load_config();
    println!(
        "[api] log file: {}, status file: {}",
        cfg.log_file.display(),
        cfg.status_file.display()
    );

    // Préchargement du cache (le journal peut ne pas exister encore)
    let cache = new_state(LogCache::new(&cfg.log_file, cfg.cache_lines));
    let initial = cache.lock().reload();
    match initial {
        Ok(()) => println!("[api] loaded {} cached samples", cache.lock().len()),
        Err(e) => eprintln!("[api] initial log load failed: {e}"),
    }

    let port = cfg.port;
    let app_state = http::AppState { cache, cfg };
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("[api] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
