//! Cesium-ion asset resolution: endpoint broker and token-refreshing loader

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::asset::resolve_url;
use crate::error::{Error, Result};
use crate::runtime::Future;
use crate::tiles::{
    Attribution, LayerJsonTerrainLoader, LoaderResult, TileLoadInput, TileLoadResult,
    TilesetContentLoader, TilesetExternals, TilesetJsonLoader,
};

/// Kind of asset an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    Terrain,
    Tiles3d,
}

/// A resolved asset endpoint: where the data lives and the bearer token
/// that unlocks it.
#[derive(Debug, Clone)]
pub struct AssetEndpoint {
    pub kind: EndpointType,
    pub url: String,
    pub access_token: String,
    pub attributions: Vec<Attribution>,
}

/// In-memory endpoint cache keyed by the asset-endpoint URL. Scoped to
/// whoever owns it (typically one per application), never a process
/// singleton; mutated only on the main lane.
#[derive(Default)]
pub struct EndpointCache {
    entries: Mutex<HashMap<String, AssetEndpoint>>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<AssetEndpoint> {
        self.entries.lock().unwrap().get(url).cloned()
    }

    pub fn insert(&self, url: String, endpoint: AssetEndpoint) {
        self.entries.lock().unwrap().insert(url, endpoint);
    }

    pub fn update_access_token(&self, url: &str, access_token: &str) {
        if let Some(endpoint) = self.entries.lock().unwrap().get_mut(url) {
            endpoint.access_token = access_token.to_string();
        }
    }
}

/// `{base}v1/assets/{id}/endpoint?access_token={token}`
pub fn endpoint_resource_url(asset_id: u64, access_token: &str, endpoint_base: &str) -> String {
    format!(
        "{}v1/assets/{}/endpoint?access_token={}",
        endpoint_base, asset_id, access_token
    )
}

#[derive(Deserialize)]
struct EndpointDocument {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
    #[serde(default, rename = "accessToken")]
    access_token: String,
    #[serde(default)]
    attributions: Vec<AttributionDocument>,
}

#[derive(Deserialize)]
struct AttributionDocument {
    #[serde(default)]
    html: String,
    #[serde(default = "default_collapsible")]
    collapsible: bool,
}

fn default_collapsible() -> bool {
    true
}

#[derive(Deserialize)]
struct TokenDocument {
    #[serde(rename = "accessToken")]
    access_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenRefreshState {
    None,
    Loading,
    Done,
    Failed,
}

/// Wraps an aggregated loader with ion credentials.
///
/// A 401 from the aggregated loader turns the result into retry-later and
/// schedules a single token refresh on the main lane; while the refresh is
/// in flight every load resolves to retry-later immediately, so a burst of
/// expired-token responses produces one endpoint fetch, not a herd.
pub struct IonTilesetLoader {
    asset_id: u64,
    access_token: String,
    endpoint_base: String,
    aggregated: Arc<dyn TilesetContentLoader>,
    refresh_state: Arc<Mutex<TokenRefreshState>>,
    header_change: HeaderChangeListener,
    cache: Arc<EndpointCache>,
}

/// Callback notifying the content manager of a header value change.
pub type HeaderChangeListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

impl IonTilesetLoader {
    /// Resolve an asset id to a concrete loader, consulting `cache` first.
    pub fn create_loader(
        externals: &TilesetExternals,
        cache: Arc<EndpointCache>,
        asset_id: u64,
        access_token: &str,
        endpoint_base: &str,
        header_change: HeaderChangeListener,
    ) -> Future<Result<LoaderResult>> {
        let endpoint_url = endpoint_resource_url(asset_id, access_token, endpoint_base);

        if let Some(endpoint) = cache.get(&endpoint_url) {
            return Self::load_from_endpoint(
                externals,
                cache,
                endpoint,
                asset_id,
                access_token.to_string(),
                endpoint_base.to_string(),
                header_change,
            );
        }

        let externals_for_handle = externals.clone();
        let access_token = access_token.to_string();
        let endpoint_base = endpoint_base.to_string();
        let fetch = externals
            .accessor
            .get(&externals.system, &endpoint_url, &[]);
        fetch.and_then_in_main(move |response| {
            if !response.is_success() {
                let error = Err(Error::Http {
                    status: response.status,
                    url: response.url,
                });
                return externals_for_handle.system.resolved(error);
            }

            let document: EndpointDocument = match serde_json::from_slice(&response.body) {
                Ok(document) => document,
                Err(e) => {
                    return externals_for_handle
                        .system
                        .resolved(Err(Error::LoaderCreation(format!(
                            "malformed endpoint response: {}",
                            e
                        ))))
                }
            };

            let attributions: Vec<Attribution> = document
                .attributions
                .into_iter()
                .map(|a| Attribution {
                    html: a.html,
                    collapsible: a.collapsible,
                })
                .collect();

            let endpoint = match document.kind.as_str() {
                "TERRAIN" => AssetEndpoint {
                    kind: EndpointType::Terrain,
                    // Terrain endpoints resolve through layer.json.
                    url: resolve_url(&document.url, "layer.json"),
                    access_token: document.access_token,
                    attributions,
                },
                "3DTILES" => AssetEndpoint {
                    kind: EndpointType::Tiles3d,
                    url: document.url,
                    access_token: document.access_token,
                    attributions,
                },
                other => {
                    return externals_for_handle
                        .system
                        .resolved(Err(Error::UnsupportedAssetType(other.to_string())))
                }
            };
            cache.insert(response.url, endpoint.clone());

            Self::load_from_endpoint(
                &externals_for_handle,
                cache,
                endpoint,
                asset_id,
                access_token,
                endpoint_base,
                header_change,
            )
        })
    }

    fn load_from_endpoint(
        externals: &TilesetExternals,
        cache: Arc<EndpointCache>,
        endpoint: AssetEndpoint,
        asset_id: u64,
        access_token: String,
        endpoint_base: String,
        header_change: HeaderChangeListener,
    ) -> Future<Result<LoaderResult>> {
        let headers = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", endpoint.access_token),
        )];

        let inner = match endpoint.kind {
            EndpointType::Terrain => {
                LayerJsonTerrainLoader::create_loader(externals, &endpoint.url, headers)
            }
            EndpointType::Tiles3d => {
                TilesetJsonLoader::create_loader(externals, &endpoint.url, headers)
            }
        };

        let attributions = endpoint.attributions;
        inner.then_immediate(move |result| {
            result.map(|mut result| {
                result.attributions.extend(attributions);
                result.loader = Arc::new(IonTilesetLoader {
                    asset_id,
                    access_token,
                    endpoint_base,
                    aggregated: result.loader.clone(),
                    refresh_state: Arc::new(Mutex::new(TokenRefreshState::None)),
                    header_change,
                    cache,
                });
                result
            })
        })
    }
}

impl TilesetContentLoader for IonTilesetLoader {
    fn load_tile_content(
        &self,
        input: TileLoadInput,
        externals: &TilesetExternals,
        headers: Vec<(String, String)>,
    ) -> Future<TileLoadResult> {
        match *self.refresh_state.lock().unwrap() {
            TokenRefreshState::Loading => {
                return externals.system.resolved(TileLoadResult::retry_later(0));
            }
            TokenRefreshState::Failed => {
                return externals.system.resolved(TileLoadResult::failed(401));
            }
            _ => {}
        }

        let refresh_state = self.refresh_state.clone();
        let cache = self.cache.clone();
        let header_change = self.header_change.clone();
        let endpoint_url =
            endpoint_resource_url(self.asset_id, &self.access_token, &self.endpoint_base);
        let externals_for_refresh = externals.clone();

        self.aggregated
            .load_tile_content(input, externals, headers)
            .then_immediate(move |mut result| {
                if result.http_status == 401 {
                    result = TileLoadResult::retry_later(401);
                    let refresh_state = refresh_state.clone();
                    let cache = cache.clone();
                    let header_change = header_change.clone();
                    let externals = externals_for_refresh.clone();
                    let url = endpoint_url.clone();
                    externals_for_refresh.system.run_in_main(move || {
                        refresh_token(&externals, refresh_state, cache, header_change, url);
                    });
                }
                result
            })
    }
}

/// Fetch a fresh bearer token from the endpoint service and publish it
/// through the header-change listener. Runs on the main lane.
fn refresh_token(
    externals: &TilesetExternals,
    refresh_state: Arc<Mutex<TokenRefreshState>>,
    cache: Arc<EndpointCache>,
    header_change: HeaderChangeListener,
    endpoint_url: String,
) {
    {
        let mut state = refresh_state.lock().unwrap();
        if *state == TokenRefreshState::Loading {
            return;
        }
        *state = TokenRefreshState::Loading;
    }

    let fetch = externals.accessor.get(&externals.system, &endpoint_url, &[]);
    fetch.then_in_main(move |response| {
        let mut state = refresh_state.lock().unwrap();
        if !response.is_success() {
            log::warn!(
                "token refresh failed with status {} for {}",
                response.status,
                response.url
            );
            *state = TokenRefreshState::Failed;
            return;
        }
        match serde_json::from_slice::<TokenDocument>(&response.body) {
            Ok(document) => {
                let notify = header_change.as_ref();
                notify(
                    "Authorization",
                    &format!("Bearer {}", document.access_token),
                );
                cache.update_access_token(&response.url, &document.access_token);
                *state = TokenRefreshState::Done;
            }
            Err(e) => {
                log::warn!("malformed token refresh response: {}", e);
                *state = TokenRefreshState::Failed;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_resource_url_shape() {
        assert_eq!(
            endpoint_resource_url(1234, "tok", "https://api.cesium.com/"),
            "https://api.cesium.com/v1/assets/1234/endpoint?access_token=tok"
        );
    }

    #[test]
    fn test_cache_token_update() {
        let cache = EndpointCache::new();
        cache.insert(
            "u".into(),
            AssetEndpoint {
                kind: EndpointType::Tiles3d,
                url: "https://t.example/tileset.json".into(),
                access_token: "old".into(),
                attributions: Vec::new(),
            },
        );
        cache.update_access_token("u", "new");
        assert_eq!(cache.get("u").unwrap().access_token, "new");
    }

    #[test]
    fn test_endpoint_document_parses_attributions() {
        let json = br#"{
            "type": "TERRAIN",
            "url": "https://assets.ion.example/1/",
            "accessToken": "abc",
            "attributions": [
                {"html": "<span>Data</span>", "collapsible": false},
                {"html": "<span>More</span>"}
            ]
        }"#;
        let document: EndpointDocument = serde_json::from_slice(json).unwrap();
        assert_eq!(document.kind, "TERRAIN");
        assert_eq!(document.attributions.len(), 2);
        assert!(!document.attributions[0].collapsible);
        assert!(document.attributions[1].collapsible);
    }
}
