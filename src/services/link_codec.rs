//! Conversion between storage coordinates and shareable links.
//!
//! Native URLs coming back from the storage client are normalised to `https`
//! by rewriting the parsed scheme, never by editing the string in place.
//! Decoding accepts the URL shapes storage providers hand out:
//!
//! - `s3://bucket/key`
//! - path style under the configured endpoint: `<endpoint>/bucket/key`
//! - AWS virtual-hosted style: `https://bucket.s3.us-east-1.amazonaws.com/key`
//! - AWS path style: `https://s3.us-east-1.amazonaws.com/bucket/key`
//!
//! Query strings are ignored, so signed links decode like direct ones.

use tracing::debug;
use url::Url;

use crate::{errors::MalformedUrl, models::link::DirectLink};

const AWS_DOMAIN_SUFFIXES: [&str; 2] = [".amazonaws.com", ".amazonaws.com.cn"];

#[derive(Clone, Debug, Default)]
pub struct LinkCodec {
    /// Base URL path-style native links are rendered under, when the
    /// provider is not AWS itself.
    endpoint: Option<Url>,
}

impl LinkCodec {
    /// Codec that only understands `s3://` and AWS host shapes.
    pub fn new() -> Self {
        Self { endpoint: None }
    }

    /// Codec that additionally resolves path-style links under `endpoint`.
    pub fn with_endpoint(endpoint: &str) -> Result<Self, MalformedUrl> {
        let url = Url::parse(endpoint).map_err(|err| MalformedUrl::new(endpoint, err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MalformedUrl::new(
                endpoint,
                "endpoint must be an http or https URL",
            ));
        }
        Ok(Self {
            endpoint: Some(url),
        })
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    /// Render a native URL as a direct link with a secure scheme.
    pub fn encode(&self, native_url: &str) -> Result<DirectLink, MalformedUrl> {
        let mut url =
            Url::parse(native_url).map_err(|err| MalformedUrl::new(native_url, err.to_string()))?;

        match url.scheme() {
            "https" => {}
            "http" => url
                .set_scheme("https")
                .map_err(|()| MalformedUrl::new(native_url, "cannot switch scheme to https"))?,
            other => {
                return Err(MalformedUrl::new(
                    native_url,
                    format!("unsupported scheme `{}`", other),
                ));
            }
        }

        Ok(DirectLink::new(String::from(url)))
    }

    /// Recover (bucket, key) from an external link.
    pub fn decode(&self, link: &str) -> Result<(String, String), MalformedUrl> {
        let url = Url::parse(link.trim()).map_err(|err| MalformedUrl::new(link, err.to_string()))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();

        let (bucket, key_segments) = match url.scheme() {
            "s3" => {
                let bucket = url
                    .host_str()
                    .ok_or_else(|| MalformedUrl::new(link, "missing bucket"))?;
                (percent_decode(link, bucket)?, segments.as_slice())
            }
            "http" | "https" => {
                if let Some(rest) = self.strip_endpoint(&url, &segments) {
                    split_path_style(link, rest)?
                } else if let Some(bucket) = aws_virtual_host_bucket(&url) {
                    (bucket, segments.as_slice())
                } else if is_aws_host(&url) {
                    split_path_style(link, &segments)?
                } else {
                    return Err(MalformedUrl::new(link, "not a storage provider URL"));
                }
            }
            other => {
                return Err(MalformedUrl::new(
                    link,
                    format!("unsupported scheme `{}`", other),
                ));
            }
        };

        if bucket.is_empty() {
            return Err(MalformedUrl::new(link, "missing bucket"));
        }

        let key = key_segments
            .iter()
            .map(|segment| percent_decode(link, segment))
            .collect::<Result<Vec<_>, _>>()?
            .join("/");
        if key.is_empty() {
            return Err(MalformedUrl::new(link, "missing object key"));
        }

        debug!("decoded link {} => bucket `{}`, key `{}`", link, bucket, key);
        Ok((bucket, key))
    }

    /// Path segments after the endpoint prefix, if `url` lives under it.
    fn strip_endpoint<'a>(&self, url: &Url, segments: &'a [&'a str]) -> Option<&'a [&'a str]> {
        let endpoint = self.endpoint.as_ref()?;
        if url.host_str() != endpoint.host_str() || url.port() != endpoint.port() {
            return None;
        }
        let prefix: Vec<&str> = endpoint
            .path_segments()
            .map(|s| s.filter(|segment| !segment.is_empty()).collect())
            .unwrap_or_default();
        if segments.len() < prefix.len() || segments[..prefix.len()] != prefix[..] {
            return None;
        }
        Some(&segments[prefix.len()..])
    }
}

/// Native URL of (bucket, key) under a path-style endpoint.
///
/// Each key segment is percent-encoded on its own, so `decode` restores the
/// key exactly.
pub fn path_style_url(endpoint: &Url, bucket: &str, key: &str) -> Url {
    let mut url = endpoint.clone();
    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
        segments.push(bucket);
        segments.extend(key.split('/'));
    }
    url
}

fn split_path_style<'a>(
    link: &str,
    segments: &'a [&'a str],
) -> Result<(String, &'a [&'a str]), MalformedUrl> {
    match segments.split_first() {
        Some((bucket, rest)) => Ok((percent_decode(link, bucket)?, rest)),
        None => Err(MalformedUrl::new(link, "missing bucket")),
    }
}

fn is_aws_host(url: &Url) -> bool {
    url.host_str()
        .map(|host| AWS_DOMAIN_SUFFIXES.iter().any(|suffix| host.ends_with(suffix)))
        .unwrap_or(false)
}

/// Bucket name from `bucket.s3[.-]region.amazonaws.com`.
fn aws_virtual_host_bucket(url: &Url) -> Option<String> {
    if !is_aws_host(url) {
        return None;
    }
    let labels: Vec<&str> = url.host_str()?.split('.').collect();
    let s3_label = labels
        .iter()
        .position(|label| *label == "s3" || label.starts_with("s3-"))?;
    if s3_label == 0 {
        return None;
    }
    Some(labels[..s3_label].join("."))
}

fn percent_decode(link: &str, segment: &str) -> Result<String, MalformedUrl> {
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .map_err(|err| MalformedUrl::new(link, format!("invalid percent-encoding: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::key_builder::build_key;

    fn local_codec() -> LinkCodec {
        LinkCodec::with_endpoint("http://localhost:3000/objects").unwrap()
    }

    #[test]
    fn encode_forces_https() {
        let codec = LinkCodec::new();
        let link = codec
            .encode("http://media.s3.amazonaws.com/docs/report.pdf")
            .unwrap();
        assert_eq!(link.as_str(), "https://media.s3.amazonaws.com/docs/report.pdf");

        let link = codec.encode("https://media.s3.amazonaws.com/a/b").unwrap();
        assert_eq!(link.as_str(), "https://media.s3.amazonaws.com/a/b");
    }

    #[test]
    fn encode_keeps_port_path_and_query() {
        let link = local_codec()
            .encode("http://localhost:3000/objects/media/docs/a%20b.pdf?versionId=3")
            .unwrap();
        assert_eq!(
            link.as_str(),
            "https://localhost:3000/objects/media/docs/a%20b.pdf?versionId=3"
        );
    }

    #[test]
    fn encode_never_emits_insecure_scheme() {
        let codec = LinkCodec::new();
        for native in [
            "http://a.s3.amazonaws.com/k/x",
            "HTTP://a.s3.amazonaws.com/k/x",
            "https://a.s3.amazonaws.com/k/x",
            "http://localhost:9000/bucket/k/x",
        ] {
            let link = codec.encode(native).unwrap();
            assert!(link.as_str().starts_with("https://"), "{native} -> {link}");
        }
        for native in ["ftp://host/k/x", "s3://bucket/k/x", "not a url", ""] {
            assert!(codec.encode(native).is_err(), "{native} should be rejected");
        }
    }

    #[test]
    fn decodes_s3_scheme() {
        let (bucket, key) = LinkCodec::new().decode("s3://media/docs/report.pdf").unwrap();
        assert_eq!(bucket, "media");
        assert_eq!(key, "docs/report.pdf");
    }

    #[test]
    fn decodes_aws_virtual_hosted_style() {
        let codec = LinkCodec::new();
        let (bucket, key) = codec
            .decode("https://media.s3.amazonaws.com/docs/report.pdf")
            .unwrap();
        assert_eq!((bucket.as_str(), key.as_str()), ("media", "docs/report.pdf"));

        let (bucket, key) = codec
            .decode("https://my.media.s3.eu-west-1.amazonaws.com/docs/report.pdf?X-Amz-Expires=60")
            .unwrap();
        assert_eq!((bucket.as_str(), key.as_str()), ("my.media", "docs/report.pdf"));

        let (bucket, _) = codec
            .decode("https://media.s3-us-west-2.amazonaws.com/docs/report.pdf")
            .unwrap();
        assert_eq!(bucket, "media");
    }

    #[test]
    fn decodes_aws_path_style() {
        let (bucket, key) = LinkCodec::new()
            .decode("https://s3.us-east-1.amazonaws.com/media/docs/2025/report.pdf")
            .unwrap();
        assert_eq!(bucket, "media");
        assert_eq!(key, "docs/2025/report.pdf");
    }

    #[test]
    fn decodes_under_configured_endpoint() {
        let (bucket, key) = local_codec()
            .decode("https://localhost:3000/objects/media/docs/a%20b.pdf?X-Signature=abc")
            .unwrap();
        assert_eq!(bucket, "media");
        assert_eq!(key, "docs/a b.pdf");
    }

    #[test]
    fn rejects_foreign_or_incomplete_links() {
        let codec = local_codec();
        for link in [
            "not a url",
            "https://example.com/media/docs/a.pdf",
            "https://localhost:4000/objects/media/docs/a.pdf",
            "https://localhost:3000/other/media/docs/a.pdf",
            "https://localhost:3000/objects/media",
            "https://localhost:3000/objects/",
            "https://s3.amazonaws.com/",
            "https://media.s3.amazonaws.com/",
            "ftp://media/docs/a.pdf",
            "s3://media",
        ] {
            assert!(codec.decode(link).is_err(), "{link} should not decode");
        }
    }

    #[test]
    fn endpoint_must_be_http() {
        assert!(LinkCodec::with_endpoint("ftp://files.local").is_err());
        assert!(LinkCodec::with_endpoint("::::").is_err());
    }

    #[test]
    fn encode_decode_round_trips_over_legal_keys() {
        let codec = local_codec();
        let endpoint = codec.endpoint().unwrap().clone();
        let pairs = [
            ("docs", "report.pdf"),
            ("employees/42", "cv final (v2).pdf"),
            ("münchen", "straße.txt"),
            ("q", "what?#hash%20.txt"),
            ("a", "b+c&d=e;f.txt"),
            ("deep/er/still", "...hidden"),
        ];
        for (folder, name) in pairs {
            let key = build_key(folder, name).unwrap().to_string();
            let native = path_style_url(&endpoint, "media", &key);
            let link = codec.encode(native.as_str()).unwrap();
            let (bucket, decoded) = codec.decode(link.as_str()).unwrap();
            assert_eq!(bucket, "media");
            assert_eq!(decoded, key, "round trip through {link}");
        }
    }
}
