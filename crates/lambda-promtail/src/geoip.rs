// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Country lookup of IP addresses found in log lines.

use lazy_static::lazy_static;
use loki_push::labels::{LabelName, LabelSet};
use maxminddb::{geoip2, Reader};
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::debug;

use crate::errors::ConfigError;

const REGION_LABEL: &str = "region";

/// Derives a `region` label from free text.
pub trait RegionAnnotator: Send + Sync {
    fn annotate(&self, text: &str) -> Option<LabelSet>;
}

/// Annotator used when no country database is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnnotator;

impl RegionAnnotator for NoopAnnotator {
    fn annotate(&self, _text: &str) -> Option<LabelSet> {
        None
    }
}

/// Resolves the first IPv4 address of a line against a country database.
pub struct GeoIpAnnotator {
    reader: Reader<Vec<u8>>,
}

impl GeoIpAnnotator {
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let reader = Reader::open_readfile(path).map_err(|e| ConfigError::GeoIp {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        debug!("GEOIP | Loaded country database {}", path.display());
        Ok(GeoIpAnnotator { reader })
    }

    fn country_of(&self, ip: Ipv4Addr) -> Option<String> {
        let country: geoip2::Country = self.reader.lookup(IpAddr::V4(ip)).ok()?;
        country
            .country
            .and_then(|c| c.iso_code)
            .map(str::to_string)
    }
}

impl RegionAnnotator for GeoIpAnnotator {
    fn annotate(&self, text: &str) -> Option<LabelSet> {
        let iso_code = find_ipv4_addresses(text)
            .into_iter()
            .find_map(|ip| self.country_of(ip))?;
        let mut labels = LabelSet::new();
        labels.insert(LabelName::parse(REGION_LABEL).ok()?, iso_code);
        Some(labels)
    }
}

lazy_static! {
    static ref IPV4_REGEX: Regex =
        Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("failed creating regex");
}

/// Dotted quads of `text` that are valid IPv4 addresses, in order of appearance.
#[must_use]
pub fn find_ipv4_addresses(text: &str) -> Vec<Ipv4Addr> {
    IPV4_REGEX
        .find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}
