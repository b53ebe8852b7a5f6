//! Incremental decoding of large JSON lists.
//!
//! Xtream panels answer `get_live_streams` with one JSON array that can hold
//! tens of thousands of objects. Instead of buffering the body and building a
//! full document, the body is streamed into a blocking task that walks the
//! top-level array (or id-keyed object) and hands each element over a bounded
//! channel as soon as it is decoded. A malformed element is reported on its
//! own and does not poison the rest of the list.

use futures::TryStreamExt;
use reqwest::Response;
use serde::de::{self, DeserializeOwned, DeserializeSeed, MapAccess, SeqAccess, Visitor};
use serde_json::Value;
use std::fmt;
use std::io::{BufReader, Read};
use std::marker::PhantomData;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::{StreamReader, SyncIoBridge};

/// Elements buffered between the decoder task and the consumer
const CHANNEL_CAPACITY: usize = 256;

/// Walks a top-level array / object / null and feeds each element to `F`.
/// `F` returns false to stop early.
struct ElementSink<F>(F);

impl<'de, F> DeserializeSeed<'de> for ElementSink<F>
where
    F: FnMut(Value) -> bool,
{
    type Value = usize;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<usize, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de, F> Visitor<'de> for ElementSink<F>
where
    F: FnMut(Value) -> bool,
{
    type Value = usize;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON array or object of records")
    }

    fn visit_seq<A: SeqAccess<'de>>(mut self, mut seq: A) -> Result<usize, A::Error> {
        let mut count = 0;
        while let Some(value) = seq.next_element::<Value>()? {
            count += 1;
            if !(self.0)(value) {
                return Err(de::Error::custom("consumer stopped reading"));
            }
        }
        Ok(count)
    }

    /// Some panels key the list by id: `{"1": {...}, "2": {...}}`
    fn visit_map<A: MapAccess<'de>>(mut self, mut map: A) -> Result<usize, A::Error> {
        let mut count = 0;
        while let Some((_, value)) = map.next_entry::<de::IgnoredAny, Value>()? {
            count += 1;
            if !(self.0)(value) {
                return Err(de::Error::custom("consumer stopped reading"));
            }
        }
        Ok(count)
    }

    fn visit_unit<E: de::Error>(self) -> Result<usize, E> {
        Ok(0)
    }

    fn visit_none<E: de::Error>(self) -> Result<usize, E> {
        Ok(0)
    }
}

/// Synchronously walk the elements of a JSON list read from `reader`.
///
/// Returns the number of elements seen. An empty body counts as an empty list.
pub fn for_each_element<R, F>(reader: R, on_element: F) -> Result<usize, serde_json::Error>
where
    R: Read,
    F: FnMut(Value) -> bool,
{
    let mut de = serde_json::Deserializer::from_reader(reader);
    match ElementSink(on_element).deserialize(&mut de) {
        Ok(count) => {
            de.end()?;
            Ok(count)
        }
        Err(e) if e.is_eof() && e.line() == 1 && e.column() == 0 => Ok(0),
        Err(e) => Err(e),
    }
}

/// Typed elements decoded on a background task
pub struct ElementStream<T> {
    rx: mpsc::Receiver<Result<T, String>>,
    task: JoinHandle<Result<usize, String>>,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned + Send + 'static> ElementStream<T> {
    /// Start decoding a response body
    pub fn from_response(response: Response) -> Self {
        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Self::from_reader(SyncIoBridge::new(StreamReader::new(body)))
    }

    /// Start decoding any blocking reader
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::task::spawn_blocking(move || {
            for_each_element(BufReader::new(reader), |value| {
                let item = serde_json::from_value::<T>(value).map_err(|e| e.to_string());
                tx.blocking_send(item).is_ok()
            })
            .map_err(|e| e.to_string())
        });

        Self {
            rx,
            task,
            _marker: PhantomData,
        }
    }

    /// Next decoded element; `Err` carries the reason one element was skipped
    pub async fn next(&mut self) -> Option<Result<T, String>> {
        self.rx.recv().await
    }

    /// Wait for the decoder; `Err` when the body itself was not a valid list
    pub async fn finish(self) -> Result<usize, String> {
        drop(self.rx);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(format!("decoder task failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: i64,
        name: String,
    }

    fn collect(json: &str) -> (Vec<Value>, Result<usize, serde_json::Error>) {
        let mut seen = Vec::new();
        let result = for_each_element(json.as_bytes(), |v| {
            seen.push(v);
            true
        });
        (seen, result)
    }

    #[test]
    fn test_array_elements() {
        let (seen, result) = collect(r#"[{"id":1},{"id":2},{"id":3}]"#);
        assert_eq!(result.unwrap(), 3);
        assert_eq!(seen[2]["id"], 3);
    }

    #[test]
    fn test_id_keyed_object() {
        let (seen, result) = collect(r#"{"10":{"id":10},"11":{"id":11}}"#);
        assert_eq!(result.unwrap(), 2);
        assert_eq!(seen[0]["id"], 10);
    }

    #[test]
    fn test_empty_and_null_bodies() {
        assert_eq!(collect("").1.unwrap(), 0);
        assert_eq!(collect("null").1.unwrap(), 0);
        assert_eq!(collect("[]").1.unwrap(), 0);
    }

    #[test]
    fn test_truncated_body_keeps_earlier_elements() {
        let (seen, result) = collect(r#"[{"id":1},{"id":2},{"id":"#);
        assert_eq!(seen.len(), 2);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_typed_stream_skips_malformed_element() {
        let json = r#"[{"id":1,"name":"a"},{"id":"oops"},{"id":3,"name":"c"}]"#;
        let mut stream = ElementStream::<Item>::from_reader(std::io::Cursor::new(json.as_bytes().to_vec()));

        let mut good = Vec::new();
        let mut bad = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(item) => good.push(item),
                Err(_) => bad += 1,
            }
        }

        assert_eq!(stream.finish().await.unwrap(), 3);
        assert_eq!(good.len(), 2);
        assert_eq!(good[1].name, "c");
        assert_eq!(bad, 1);
    }
}
