//! REST data source for the portfolio management server.
//!
//! Endpoints (all below `{server}/rest/energy/belvis/{tenant}`):
//! - `timeSeries?instancetoken={pfid}`: paths of all timeseries in a portfolio,
//! - `timeSeries/{id}`: metadata (name and unit),
//! - `timeSeries/{id}/values?timeRange=..&timeRangeType=..&blocking=..`: values.
//!
//! Every request that fails is retried once, after authenticating again,
//! since the session may have expired. A second failure is returned as a
//! `Transport` error.

use super::cache::IdCache;
use super::provider::{unique_match, DataSource, FetchOptions, SourceError};
use crate::config::{self, DocumentError};
use crate::series::{Freq, Series, Unit};
use crate::tree::TsId;
use chrono::DateTime;
use chrono_tz::Tz;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server coordinates, as stored in the api file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Address including port, e.g. `http://belvis.example.com:8040`.
    pub server: String,
    pub tenant: String,
    /// JSON file to persist resolved timeseries ids in.
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
}

impl ApiConfig {
    /// Load from a YAML, TOML or JSON file. A relative `cache_file` is taken
    /// relative to the api file.
    pub fn from_file(path: &Path) -> Result<Self, DocumentError> {
        let mut api: ApiConfig = config::load_file(path)?;
        if let (Some(cache), Some(dir)) = (&api.cache_file, path.parent()) {
            if cache.is_relative() {
                api.cache_file = Some(dir.join(cache));
            }
        }
        Ok(api)
    }
}

/// Raw reply of a GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn into_success(self, url: &str) -> Result<Self, SourceError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SourceError::Transport {
                url: url.to_string(),
                reason: format!("HTTP {}", self.status),
            })
        }
    }
}

/// How requests reach the server: authenticate, then GET.
pub trait Access: Send + Sync {
    fn authenticate(&self) -> Result<(), SourceError>;

    fn get(&self, url: &str) -> Result<HttpReply, SourceError>;
}

/// Session-cookie access with user name and password.
pub struct UserPasswordAccess {
    client: reqwest::blocking::Client,
    auth_url: Url,
    /// Auth url without credentials, for error messages.
    display_url: String,
}

impl UserPasswordAccess {
    /// Build the client and authenticate once, to verify the credentials.
    pub fn connect(api: &ApiConfig, user: &str, password: &str) -> Result<Self, SourceError> {
        let display_url = format!("{}/rest/session", api.server.trim_end_matches('/'));
        let auth_url = Url::parse_with_params(
            &display_url,
            &[("tenant", api.tenant.as_str()), ("usr", user), ("pwd", password)],
        )
        .map_err(|e| SourceError::Transport {
            url: display_url.clone(),
            reason: e.to_string(),
        })?;
        let client = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| SourceError::Transport {
                url: display_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        let access = Self {
            client,
            auth_url,
            display_url,
        };
        access.authenticate()?;
        Ok(access)
    }
}

impl Access for UserPasswordAccess {
    fn authenticate(&self) -> Result<(), SourceError> {
        let resp = self
            .client
            .get(self.auth_url.clone())
            .send()
            .map_err(|e| SourceError::Transport {
                url: self.display_url.clone(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(SourceError::Auth(format!(
                "{} answered {}; check server, tenant and credentials",
                self.display_url,
                resp.status()
            )));
        }
        Ok(())
    }

    fn get(&self, url: &str) -> Result<HttpReply, SourceError> {
        let transport = |e: reqwest::Error| SourceError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let resp = self.client.get(url).send().map_err(transport)?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(transport)?;
        Ok(HttpReply { status, body })
    }
}

/// Metadata of a timeseries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: TsId,
    pub time_series_name: String,
    #[serde(default)]
    pub measurement_unit: String,
}

/// One value record of the values endpoint.
///
/// Only values flagged `pf == "missing"` are replaced per `MissingPolicy`; a
/// null value with any other flag is kept as NaN.
#[derive(Debug, Deserialize)]
struct Record {
    ts: String,
    v: Option<f64>,
    #[serde(default)]
    pf: String,
}

pub struct RestSource {
    api: ApiConfig,
    access: Box<dyn Access>,
    cache: IdCache,
}

impl RestSource {
    pub fn new(api: ApiConfig, access: Box<dyn Access>, cache: IdCache) -> Self {
        Self { api, access, cache }
    }

    /// Connect with user name and password; opens the configured id cache.
    pub fn connect(api: ApiConfig, user: &str, password: &str) -> Result<Self, SourceError> {
        let access = UserPasswordAccess::connect(&api, user, password)?;
        let cache = match &api.cache_file {
            Some(path) => IdCache::open(path)?,
            None => IdCache::in_memory(),
        };
        Ok(Self::new(api, Box::new(access), cache))
    }

    pub fn cache(&self) -> &IdCache {
        &self.cache
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, SourceError> {
        let base = format!(
            "{}/rest/energy/belvis/{}/{}",
            self.api.server.trim_end_matches('/'),
            self.api.tenant,
            path
        );
        let parsed = if query.is_empty() {
            Url::parse(&base)
        } else {
            Url::parse_with_params(&base, query)
        };
        parsed.map_err(|e| SourceError::Transport {
            url: base.clone(),
            reason: e.to_string(),
        })
    }

    /// GET and decode JSON, re-authenticating and retrying once on failure.
    fn query<T: DeserializeOwned>(&self, url: &Url) -> Result<T, SourceError> {
        let url = url.as_str();
        let reply = match self.access.get(url).and_then(|r| r.into_success(url)) {
            Ok(reply) => reply,
            Err(first) => {
                tracing::debug!(%url, error = %first, "request failed; authenticating again");
                self.access.authenticate()?;
                self.access.get(url)?.into_success(url)?
            }
        };
        serde_json::from_str(&reply.body).map_err(|e| SourceError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn metadata(&self, id: TsId) -> Result<Metadata, SourceError> {
        self.query(&self.url(&format!("timeSeries/{id}"), &[])?)
    }

    /// Every (name, id) in a portfolio, duplicates included.
    ///
    /// The id cache for the portfolio is replaced by the names that occur once;
    /// duplicated names are left out so that resolving them searches again and
    /// stays ambiguous.
    pub fn catalog(&self, portfolio_id: &str) -> Result<Vec<(String, TsId)>, SourceError> {
        let url = self.url("timeSeries", &[("instancetoken", portfolio_id)])?;
        let paths: Vec<String> = self.query(&url)?;
        let mut found = Vec::with_capacity(paths.len());
        for path in &paths {
            let id = path
                .rsplit('/')
                .next()
                .and_then(|last| last.parse::<i64>().ok())
                .ok_or_else(|| SourceError::Decode {
                    url: url.to_string(),
                    reason: format!("'{path}' does not end in a timeseries id"),
                })?;
            let meta = self.metadata(TsId(id))?;
            found.push((meta.time_series_name, meta.id));
        }
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (name, _) in &found {
            *counts.entry(name.as_str()).or_default() += 1;
        }
        let unique = found
            .iter()
            .filter(|(name, _)| counts.get(name.as_str()) == Some(&1))
            .cloned();
        self.cache.replace_portfolio(portfolio_id, unique)?;
        Ok(found)
    }

    /// Timeseries in a portfolio whose name matches `name`.
    pub fn find(
        &self,
        portfolio_id: &str,
        name: &str,
        case_insensitive: bool,
        allow_partial: bool,
    ) -> Result<Vec<(String, TsId)>, SourceError> {
        let fold = |s: &str| if case_insensitive { s.to_lowercase() } else { s.to_string() };
        let wanted = fold(name);
        Ok(self
            .catalog(portfolio_id)?
            .into_iter()
            .filter(|(found, _)| {
                let found = fold(found);
                if allow_partial {
                    found.contains(&wanted)
                } else {
                    found == wanted
                }
            })
            .collect())
    }
}

impl DataSource for RestSource {
    fn name(&self) -> &str {
        "rest"
    }

    fn resolve_id(&self, portfolio_id: &str, name: &str) -> Result<TsId, SourceError> {
        if let Some(id) = self.cache.get(portfolio_id, name) {
            return Ok(id);
        }
        tracing::warn!(
            portfolio = portfolio_id,
            name,
            "timeseries not in id cache; searching the whole portfolio"
        );
        let hits: Vec<TsId> = self
            .find(portfolio_id, name, false, false)?
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        unique_match(portfolio_id, name, &hits)
    }

    fn fetch_series(
        &self,
        id: TsId,
        left: DateTime<Tz>,
        right: DateTime<Tz>,
        options: &FetchOptions,
    ) -> Result<Series, SourceError> {
        let meta = self.metadata(id)?;
        let range = format!("{}--{}", left.to_rfc3339(), right.to_rfc3339());
        let range_type = format!("{}-{}", options.left.as_str(), options.right.as_str());
        let blocking = if options.blocking { "true" } else { "false" };
        let url = self.url(
            &format!("timeSeries/{id}/values"),
            &[
                ("timeRange", range.as_str()),
                ("timeRangeType", range_type.as_str()),
                ("blocking", blocking),
            ],
        )?;
        let records: Vec<Record> = self.query(&url)?;
        series_from_records(&records, &meta.measurement_unit, options).map_err(|e| match e {
            SourceError::Decode { reason, .. } => SourceError::Decode {
                url: url.to_string(),
                reason,
            },
            other => other,
        })
    }

    fn list_all(&self, portfolio_id: &str) -> Result<BTreeMap<String, TsId>, SourceError> {
        Ok(self.catalog(portfolio_id)?.into_iter().collect())
    }
}

fn series_from_records(records: &[Record], unit: &str, options: &FetchOptions) -> Result<Series, SourceError> {
    let mut index = Vec::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len());
    for record in records {
        let ts = DateTime::parse_from_rfc3339(&record.ts).map_err(|e| SourceError::Decode {
            url: String::new(),
            reason: format!("bad timestamp '{}': {e}", record.ts),
        })?;
        index.push(ts.with_timezone(&chrono_tz::UTC));
        let value = if record.pf == "missing" {
            options.missing.value()
        } else {
            record.v.unwrap_or(f64::NAN)
        };
        values.push(value);
    }
    let freq = Freq::infer(&index);
    Ok(Series::new(index, values, Unit::parse(unit)?)?.with_freq(freq))
}

fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<TsId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(TsId(n)),
        Raw::Text(s) => s.trim().parse().map(TsId).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies from a script, in order; records every url.
    #[derive(Default)]
    struct ScriptedAccess {
        replies: Mutex<VecDeque<HttpReply>>,
        urls: Mutex<Vec<String>>,
        logins: AtomicUsize,
    }

    impl ScriptedAccess {
        fn new(replies: Vec<(u16, &str)>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|(status, body)| HttpReply {
                            status,
                            body: body.to_string(),
                        })
                        .collect(),
                ),
                ..Default::default()
            }
        }
    }

    impl Access for std::sync::Arc<ScriptedAccess> {
        fn authenticate(&self) -> Result<(), SourceError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn get(&self, url: &str) -> Result<HttpReply, SourceError> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(self.replies.lock().unwrap().pop_front().unwrap_or(HttpReply {
                status: 404,
                body: String::new(),
            }))
        }
    }

    fn source(access: &std::sync::Arc<ScriptedAccess>) -> RestSource {
        let api = ApiConfig {
            server: "http://server:8040/".into(),
            tenant: "PFMG".into(),
            cache_file: None,
        };
        RestSource::new(api, Box::new(access.clone()), IdCache::in_memory())
    }

    const META: &str = r#"{"id": 12, "timeSeriesName": "Volume MW", "measurementUnit": "MW"}"#;

    #[test]
    fn retries_once_after_authenticating() {
        let access = std::sync::Arc::new(ScriptedAccess::new(vec![(401, ""), (200, META)]));
        let meta = source(&access).metadata(TsId(12)).unwrap();
        assert_eq!(meta.time_series_name, "Volume MW");
        assert_eq!(access.logins.load(Ordering::SeqCst), 1);
        let urls = access.urls.lock().unwrap();
        assert_eq!(urls[0], "http://server:8040/rest/energy/belvis/PFMG/timeSeries/12");
    }

    #[test]
    fn second_failure_is_a_transport_error() {
        let access = std::sync::Arc::new(ScriptedAccess::new(vec![(500, ""), (500, "")]));
        let err = source(&access).metadata(TsId(12)).unwrap_err();
        match err {
            SourceError::Transport { url, reason } => {
                assert!(url.ends_with("/timeSeries/12"));
                assert_eq!(reason, "HTTP 500");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn resolves_through_catalog_and_caches() {
        let access = std::sync::Arc::new(ScriptedAccess::new(vec![
            (200, r#"["/rest/energy/belvis/PFMG/timeSeries/12", "/x/13"]"#),
            (200, META),
            (200, r#"{"id": "13", "timeSeriesName": "Price", "measurementUnit": "Eur/MWh"}"#),
        ]));
        let src = source(&access);
        assert_eq!(src.resolve_id("P1", "Volume MW").unwrap(), TsId(12));
        assert_eq!(src.cache().get("P1", "Price"), Some(TsId(13)));
        // Served from the cache now; no more requests.
        assert_eq!(src.resolve_id("P1", "Price").unwrap(), TsId(13));
        assert_eq!(access.urls.lock().unwrap().len(), 3);
    }

    #[test]
    fn duplicate_names_on_server_are_ambiguous() {
        let meta = r#"{"id": 5, "timeSeriesName": "Dup", "measurementUnit": "MW"}"#;
        let meta2 = r#"{"id": 6, "timeSeriesName": "Dup", "measurementUnit": "MW"}"#;
        let access = std::sync::Arc::new(ScriptedAccess::new(vec![
            (200, r#"["/a/5", "/a/6"]"#),
            (200, meta),
            (200, meta2),
        ]));
        assert!(matches!(
            source(&access).resolve_id("P1", "Dup"),
            Err(SourceError::Ambiguous { count: 2, .. })
        ));
    }

    fn duplicate_catalog() -> Vec<(u16, &'static str)> {
        vec![
            (200, r#"["/a/5", "/a/6", "/a/7"]"#),
            (200, r#"{"id": 5, "timeSeriesName": "Dup", "measurementUnit": "MW"}"#),
            (200, r#"{"id": 6, "timeSeriesName": "Dup", "measurementUnit": "MW"}"#),
            (200, r#"{"id": 7, "timeSeriesName": "Single", "measurementUnit": "MW"}"#),
        ]
    }

    #[test]
    fn duplicate_names_stay_ambiguous_on_every_lookup() {
        let replies = [duplicate_catalog(), duplicate_catalog()].concat();
        let access = std::sync::Arc::new(ScriptedAccess::new(replies));
        let src = source(&access);
        for _ in 0..2 {
            assert!(matches!(
                src.resolve_id("P1", "Dup"),
                Err(SourceError::Ambiguous { count: 2, .. })
            ));
        }
        assert_eq!(src.cache().get("P1", "Dup"), None);
        assert_eq!(src.cache().get("P1", "Single"), Some(TsId(7)));
    }

    #[test]
    fn duplicate_names_stay_ambiguous_after_listing() {
        let replies = [duplicate_catalog(), duplicate_catalog()].concat();
        let access = std::sync::Arc::new(ScriptedAccess::new(replies));
        let src = source(&access);
        let listed = src.list_all("P1").unwrap();
        assert!(listed.contains_key("Dup"));
        assert_eq!(src.resolve_id("P1", "Single").unwrap(), TsId(7));
        assert!(matches!(
            src.resolve_id("P1", "Dup"),
            Err(SourceError::Ambiguous { count: 2, .. })
        ));
    }

    #[test]
    fn missing_values_follow_policy() {
        let records: Vec<Record> = serde_json::from_str(
            r#"[
                {"ts": "2024-01-01T01:00:00+01:00", "v": 1.5, "pf": "estimated"},
                {"ts": "2024-01-01T02:00:00+01:00", "v": 7.0, "pf": "missing"},
                {"ts": "2024-01-01T03:00:00+01:00", "v": null, "pf": "missing"},
                {"ts": "2024-01-01T04:00:00+01:00", "v": null, "pf": "estimated"}
            ]"#,
        )
        .unwrap();
        let opts = FetchOptions::default();
        let s = series_from_records(&records, "kW", &opts).unwrap();
        assert_eq!(&s.values()[..3], &[1.5, 0.0, 0.0]);
        // Unflagged nulls are not filled in.
        assert!(s.values()[3].is_nan());
        assert_eq!(s.freq(), Some(Freq::Hour));
        assert_eq!(s.unit().symbol, "kW");
        let nan = series_from_records(
            &records,
            "kW",
            &opts.with_missing(crate::data::MissingPolicy::Nan),
        )
        .unwrap();
        assert!(nan.values()[1].is_nan());
    }

    #[test]
    fn values_request_carries_range_and_flags() {
        use chrono::TimeZone;
        let access = std::sync::Arc::new(ScriptedAccess::new(vec![(200, META), (200, "[]")]));
        let left = chrono_tz::Europe::Berlin.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let right = chrono_tz::Europe::Berlin.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let s = source(&access)
            .fetch_series(TsId(12), left, right, &FetchOptions::default())
            .unwrap();
        assert!(s.is_empty());
        let urls = access.urls.lock().unwrap();
        let values_url = Url::parse(&urls[1]).unwrap();
        assert_eq!(values_url.path(), "/rest/energy/belvis/PFMG/timeSeries/12/values");
        let query: BTreeMap<String, String> = values_url.query_pairs().into_owned().collect();
        assert_eq!(query["timeRange"], "2024-01-01T00:00:00+01:00--2024-01-02T00:00:00+01:00");
        assert_eq!(query["timeRangeType"], "exclusive-inclusive");
        assert_eq!(query["blocking"], "true");
    }
}
