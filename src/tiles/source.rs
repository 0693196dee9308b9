use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::core::geo::{LatLng, TileKey};
use crate::{MapError, Result};

/// How a provider serves imagery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderKind {
    /// Standard XYZ tiles; the template uses `{z} {x} {y}` and optionally `{s}`
    Xyz {
        url_template: String,
        #[serde(default)]
        subdomains: Vec<String>,
    },
    /// One pre-rendered image per request; the template uses
    /// `{lat} {lon} {zoom} {width} {height}` and optionally `{key}`
    StaticImage { url_template: String },
}

/// Immutable descriptor of one map style
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    #[serde(flatten)]
    pub kind: ProviderKind,
    #[serde(default = "default_ext")]
    pub ext: String,
    /// Pause after each successful download, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Extra attempts after the first failed one
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub no_labels: bool,
}

fn default_ext() -> String {
    "png".to_string()
}

fn default_delay_ms() -> u64 {
    200
}

fn default_retries() -> u32 {
    2
}

impl Provider {
    /// XYZ provider with the usual politeness settings
    pub fn xyz(id: &str, url_template: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ProviderKind::Xyz {
                url_template: url_template.to_string(),
                subdomains: Vec::new(),
            },
            ext: default_ext(),
            delay_ms: default_delay_ms(),
            retries: default_retries(),
            no_labels: false,
        }
    }

    pub fn static_image(id: &str, url_template: &str) -> Self {
        Self {
            kind: ProviderKind::StaticImage {
                url_template: url_template.to_string(),
            },
            ..Self::xyz(id, "")
        }
    }

    pub fn with_subdomains(mut self, subs: &[&str]) -> Self {
        if let ProviderKind::Xyz { subdomains, .. } = &mut self.kind {
            *subdomains = subs.iter().map(|s| s.to_string()).collect();
        }
        self
    }

    pub fn with_ext(mut self, ext: &str) -> Self {
        self.ext = ext.to_string();
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn without_labels(mut self) -> Self {
        self.no_labels = true;
        self
    }

    /// Ids name output and cache folders, so they must be a single plain
    /// path segment. The extension ends cache file names.
    pub fn validate(&self) -> Result<()> {
        let mut components = Path::new(&self.id).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(MapError::UnsafePath(self.id.clone()));
        }
        if self.ext.is_empty() || !self.ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(MapError::InvalidParameter(format!(
                "provider '{}' has invalid extension '{}'",
                self.id, self.ext
            )));
        }
        Ok(())
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, ProviderKind::StaticImage { .. })
    }

    /// File extension with "jpg" normalized to "jpeg"
    pub fn normalized_ext(&self) -> String {
        let ext = self.ext.to_lowercase();
        if ext == "jpg" {
            "jpeg".to_string()
        } else {
            ext
        }
    }

    /// URL of one tile. `counter` rotates through the subdomains; an
    /// empty subdomain list falls back to "a".
    pub fn tile_url(&self, key: &TileKey, counter: usize) -> Result<String> {
        let ProviderKind::Xyz {
            url_template,
            subdomains,
        } = &self.kind
        else {
            return Err(MapError::InvalidParameter(format!(
                "provider '{}' does not serve tiles",
                self.id
            )));
        };

        let sub = if subdomains.is_empty() {
            "a"
        } else {
            subdomains[counter % subdomains.len()].as_str()
        };

        Ok(url_template
            .replace("{s}", sub)
            .replace("{z}", &key.z.to_string())
            .replace("{x}", &key.x.to_string())
            .replace("{y}", &key.y.to_string()))
    }

    /// URL of a whole static image centered on `center`
    pub fn static_url(
        &self,
        center: &LatLng,
        zoom: u8,
        size: (u32, u32),
        api_key: Option<&str>,
    ) -> Result<String> {
        let ProviderKind::StaticImage { url_template } = &self.kind else {
            return Err(MapError::InvalidParameter(format!(
                "provider '{}' is not a static-image provider",
                self.id
            )));
        };

        if url_template.contains("{key}") && api_key.is_none() {
            return Err(MapError::InvalidParameter(format!(
                "provider '{}' needs an API key",
                self.id
            )));
        }

        Ok(url_template
            .replace("{lat}", &center.lat.to_string())
            .replace("{lon}", &center.lng.to_string())
            .replace("{zoom}", &zoom.to_string())
            .replace("{width}", &size.0.to_string())
            .replace("{height}", &size.1.to_string())
            .replace("{key}", api_key.unwrap_or_default()))
    }
}

static BUILTIN_PROVIDERS: Lazy<Vec<Provider>> = Lazy::new(|| {
    let carto = ["a", "b", "c", "d"];
    let abc = ["a", "b", "c"];
    let google = "https://maps.googleapis.com/maps/api/staticmap?center={lat},{lon}&zoom={zoom}&size={width}x{height}&maptype=";

    vec![
        // No labels, good under overlays
        Provider::xyz(
            "carto_light_nolabels",
            "https://{s}.basemaps.cartocdn.com/light_nolabels/{z}/{x}/{y}.png",
        )
        .with_subdomains(&carto)
        .without_labels(),
        Provider::xyz(
            "carto_dark_nolabels",
            "https://{s}.basemaps.cartocdn.com/dark_nolabels/{z}/{x}/{y}.png",
        )
        .with_subdomains(&carto)
        .without_labels(),
        Provider::xyz(
            "carto_voyager_nolabels",
            "https://{s}.basemaps.cartocdn.com/rastertiles/voyager_nolabels/{z}/{x}/{y}.png",
        )
        .with_subdomains(&carto)
        .without_labels(),
        Provider::xyz(
            "swisstopo_swissimage",
            "https://wmts.geo.admin.ch/1.0.0/ch.swisstopo.swissimage/default/current/3857/{z}/{x}/{y}.jpeg",
        )
        .with_ext("jpeg")
        .without_labels(),
        // Labeled
        Provider::xyz("osm_standard", "https://tile.openstreetmap.org/{z}/{x}/{y}.png"),
        Provider::xyz("opentopo", "https://{s}.tile.opentopomap.org/{z}/{x}/{y}.png")
            .with_subdomains(&abc)
            .with_delay_ms(250),
        Provider::xyz(
            "cyc_osm",
            "https://{s}.tile-cyclosm.openstreetmap.fr/cyclosm/{z}/{x}/{y}.png",
        )
        .with_subdomains(&abc)
        .with_delay_ms(250),
        Provider::xyz(
            "swisstopo_pixelkarte_farbe",
            "https://wmts.geo.admin.ch/1.0.0/ch.swisstopo.pixelkarte-farbe/default/current/3857/{z}/{x}/{y}.jpeg",
        )
        .with_ext("jpeg"),
        // Static images, rendered server-side; need an API key
        Provider::static_image("google_roadmap", &format!("{google}roadmap&key={{key}}")),
        Provider::static_image("google_terrain", &format!("{google}terrain&key={{key}}")),
        Provider::static_image("google_hybrid", &format!("{google}hybrid&key={{key}}")),
        Provider::static_image("google_satellite", &format!("{google}satellite&key={{key}}")),
    ]
});

/// Ordered set of provider descriptors, looked up by id
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock styles
    pub fn builtin() -> Self {
        Self {
            providers: BUILTIN_PROVIDERS.clone(),
        }
    }

    /// Adds a provider, replacing any existing one with the same id
    pub fn register(&mut self, provider: Provider) -> Result<()> {
        provider.validate()?;
        match self.providers.iter_mut().find(|p| p.id == provider.id) {
            Some(existing) => *existing = provider,
            None => self.providers.push(provider),
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolves the providers of a render in the order requested.
    ///
    /// An empty `ids` list selects every provider.
    pub fn select(&self, ids: &[String], only_no_labels: bool) -> Result<Vec<Provider>> {
        let mut selected = if ids.is_empty() {
            self.providers.clone()
        } else {
            ids.iter()
                .map(|id| {
                    self.get(id)
                        .cloned()
                        .ok_or_else(|| MapError::UnknownProvider(id.clone()))
                })
                .collect::<Result<Vec<_>>>()?
        };

        if only_no_labels {
            selected.retain(|p| p.no_labels);
            log::info!("only no-label providers -> {} selected", selected.len());
        }

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(z: u8, x: u32, y: u32) -> TileKey {
        TileKey {
            provider: "test".to_string(),
            ext: "png".to_string(),
            z,
            x,
            y,
        }
    }

    #[test]
    fn test_tile_url_substitution_and_subdomain_rotation() {
        let provider = Provider::xyz("t", "https://{s}.example.org/{z}/{x}/{y}.png")
            .with_subdomains(&["a", "b", "c"]);

        assert_eq!(
            provider.tile_url(&key(8, 131, 89), 0).unwrap(),
            "https://a.example.org/8/131/89.png"
        );
        assert_eq!(
            provider.tile_url(&key(8, 131, 89), 4).unwrap(),
            "https://b.example.org/8/131/89.png"
        );
    }

    #[test]
    fn test_missing_subdomains_fall_back_to_a() {
        let provider = Provider::xyz("t", "https://{s}.example.org/{z}/{x}/{y}.png");
        assert_eq!(
            provider.tile_url(&key(1, 0, 1), 7).unwrap(),
            "https://a.example.org/1/0/1.png"
        );
    }

    #[test]
    fn test_static_url_requires_key_when_templated() {
        let registry = ProviderRegistry::builtin();
        let google = registry.get("google_terrain").unwrap();
        let center = LatLng::new(46.5, 6.5);

        assert!(google.static_url(&center, 8, (480, 320), None).is_err());

        let url = google
            .static_url(&center, 8, (480, 320), Some("secret"))
            .unwrap();
        assert!(url.contains("center=46.5,6.5"));
        assert!(url.contains("zoom=8"));
        assert!(url.contains("size=480x320"));
        assert!(url.contains("maptype=terrain"));
        assert!(url.ends_with("key=secret"));
    }

    #[test]
    fn test_builtin_registry_and_selection() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(registry.len(), 12);
        assert_eq!(registry.get("swisstopo_swissimage").unwrap().normalized_ext(), "jpeg");

        let no_labels = registry.select(&[], true).unwrap();
        assert_eq!(no_labels.len(), 4);
        assert!(no_labels.iter().all(|p| p.no_labels));

        let picked = registry
            .select(&["opentopo".to_string(), "osm_standard".to_string()], false)
            .unwrap();
        assert_eq!(picked[0].id, "opentopo");
        assert_eq!(picked[1].id, "osm_standard");

        assert!(matches!(
            registry.select(&["nope".to_string()], false),
            Err(MapError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_register_replaces_by_id() {
        let mut registry = ProviderRegistry::builtin();
        registry
            .register(Provider::xyz("osm_standard", "http://localhost/{z}/{x}/{y}.png"))
            .unwrap();
        registry
            .register(Provider::xyz("local", "http://localhost/{z}/{x}/{y}.png"))
            .unwrap();

        assert_eq!(registry.len(), 13);
        let osm = registry.get("osm_standard").unwrap();
        assert_eq!(osm.tile_url(&key(0, 0, 0), 0).unwrap(), "http://localhost/0/0/0.png");
    }

    #[test]
    fn test_register_rejects_ids_and_extensions_that_are_not_plain_names() {
        let mut registry = ProviderRegistry::new();
        for id in ["", ".", "..", "../../x", "a/b", "/tmp/precious"] {
            assert!(
                matches!(
                    registry.register(Provider::xyz(id, "http://localhost/{z}/{x}/{y}.png")),
                    Err(MapError::UnsafePath(_))
                ),
                "id {id:?} was accepted"
            );
        }
        assert!(matches!(
            registry.register(Provider::xyz("ok", "http://localhost/{z}/{x}/{y}").with_ext("../png")),
            Err(MapError::InvalidParameter(_))
        ));
        assert!(registry.is_empty());

        registry
            .register(Provider::xyz("my-tiles_2", "http://localhost/{z}/{x}/{y}.png"))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_provider_deserializes_with_defaults() {
        let json = r#"{
            "id": "local",
            "type": "xyz",
            "url_template": "http://localhost:8080/{z}/{x}/{y}.jpg",
            "ext": "jpg"
        }"#;
        let provider: Provider = serde_json::from_str(json).unwrap();
        assert_eq!(provider.retries, 2);
        assert_eq!(provider.delay_ms, 200);
        assert_eq!(provider.normalized_ext(), "jpeg");
        assert!(!provider.is_static());
    }
}
