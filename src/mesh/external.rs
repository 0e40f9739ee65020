//! Resolution of external buffer and image URIs

use std::sync::Arc;

use crate::asset::{resolve_url, AssetAccessor};
use crate::error::{Error, Result};
use crate::runtime::{AsyncSystem, Future};

use super::model::Model;

enum Target {
    Buffer(usize),
    Image(usize),
}

/// Fetch every external buffer and image URI until the model is
/// self-contained. Fetches chain one after another; the returned future
/// resolves with the completed model or the first fetch error.
pub fn resolve_external_data(
    system: &AsyncSystem,
    accessor: Arc<dyn AssetAccessor>,
    base_url: String,
    headers: Vec<(String, String)>,
    model: Model,
) -> Future<Result<Model>> {
    let mut pending = Vec::new();
    for (i, buffer) in model.buffers.iter().enumerate() {
        if buffer.data.is_empty() {
            if let Some(uri) = &buffer.uri {
                pending.push((Target::Buffer(i), uri.clone()));
            }
        }
    }
    for (i, image) in model.images.iter().enumerate() {
        if image.data.is_empty() {
            if let Some(uri) = &image.uri {
                pending.push((Target::Image(i), uri.clone()));
            }
        }
    }

    resolve_next(system.clone(), accessor, base_url, headers, model, pending)
}

fn resolve_next(
    system: AsyncSystem,
    accessor: Arc<dyn AssetAccessor>,
    base_url: String,
    headers: Vec<(String, String)>,
    mut model: Model,
    mut pending: Vec<(Target, String)>,
) -> Future<Result<Model>> {
    let Some((target, uri)) = pending.pop() else {
        return system.resolved(Ok(model));
    };

    let url = resolve_url(&base_url, &uri);
    let fetch = accessor.get(&system, &url, &headers);
    fetch.and_then_immediate(move |response| {
        if !response.is_success() {
            return system.resolved(Err(Error::Http {
                status: response.status,
                url: response.url,
            }));
        }
        match target {
            Target::Buffer(i) => model.buffers[i].data = response.body,
            Target::Image(i) => model.images[i].data = response.body,
        }
        resolve_next(system, accessor, base_url, headers, model, pending)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Response;
    use crate::mesh::model::{Buffer, Image};
    use std::sync::Mutex;

    struct FixedAccessor {
        responses: Mutex<std::collections::HashMap<String, Vec<u8>>>,
        requests: Mutex<Vec<String>>,
    }

    impl AssetAccessor for FixedAccessor {
        fn get(
            &self,
            system: &AsyncSystem,
            url: &str,
            _headers: &[(String, String)],
        ) -> Future<Response> {
            self.requests.lock().unwrap().push(url.to_string());
            let body = self
                .responses
                .lock()
                .unwrap()
                .get(url)
                .cloned();
            system.resolved(Response {
                status: if body.is_some() { 200 } else { 404 },
                headers: Vec::new(),
                body: body.unwrap_or_default(),
                url: url.to_string(),
            })
        }
    }

    #[test]
    fn test_fills_external_buffers_and_images() {
        let system = AsyncSystem::new(0);
        let mut responses = std::collections::HashMap::new();
        responses.insert("https://x.example/a/data.bin".to_string(), vec![1u8, 2, 3]);
        responses.insert("https://x.example/a/skin.png".to_string(), vec![9u8]);
        let accessor = Arc::new(FixedAccessor {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        });

        let mut model = Model::default();
        model.buffers.push(Buffer {
            uri: Some("data.bin".into()),
            data: Vec::new(),
        });
        model.images.push(Image {
            uri: Some("skin.png".into()),
            data: Vec::new(),
        });

        let out = Arc::new(Mutex::new(None));
        resolve_external_data(
            &system,
            accessor.clone(),
            "https://x.example/a/tile.glb".into(),
            Vec::new(),
            model,
        )
        .then_immediate({
            let out = out.clone();
            move |result| {
                *out.lock().unwrap() = Some(result);
            }
        });

        let model = out.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(model.buffers[0].data, vec![1, 2, 3]);
        assert_eq!(model.images[0].data, vec![9]);
        assert_eq!(accessor.requests.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_resource_is_an_error_value() {
        let system = AsyncSystem::new(0);
        let accessor = Arc::new(FixedAccessor {
            responses: Mutex::new(std::collections::HashMap::new()),
            requests: Mutex::new(Vec::new()),
        });

        let mut model = Model::default();
        model.buffers.push(Buffer {
            uri: Some("gone.bin".into()),
            data: Vec::new(),
        });

        let out = Arc::new(Mutex::new(None));
        resolve_external_data(&system, accessor, "https://x.example/t.glb".into(), Vec::new(), model)
            .then_immediate({
                let out = out.clone();
                move |result| {
                    *out.lock().unwrap() = Some(result);
                }
            });

        assert!(matches!(
            out.lock().unwrap().take().unwrap(),
            Err(Error::Http { status: 404, .. })
        ));
    }

    #[test]
    fn test_self_contained_model_needs_no_fetch() {
        let system = AsyncSystem::new(0);
        let accessor = Arc::new(FixedAccessor {
            responses: Mutex::new(std::collections::HashMap::new()),
            requests: Mutex::new(Vec::new()),
        });

        let out = Arc::new(Mutex::new(None));
        resolve_external_data(&system, accessor.clone(), String::new(), Vec::new(), Model::default())
            .then_immediate({
                let out = out.clone();
                move |result| {
                    *out.lock().unwrap() = Some(result);
                }
            });

        assert!(out.lock().unwrap().take().unwrap().is_ok());
        assert!(accessor.requests.lock().unwrap().is_empty());
    }
}
