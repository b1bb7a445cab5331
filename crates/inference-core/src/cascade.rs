//! Haar cascade object detection.
//!
//! Loads boosted Haar classifiers stored in the OpenCV XML cascade format
//! and evaluates them over an image pyramid.
//!
//! # Algorithm
//!
//! 1. **Pyramid:** shrink the image by `scale_factor` per level while the
//!    cascade window still fits.
//! 2. **Integral images:** per level sum and squared sum, giving O(1)
//!    rectangle sums and a per-window variance normalization factor.
//! 3. **Stages:** each window runs through the boosted stages in order and is
//!    rejected by the first stage whose weak-classifier sum falls below its
//!    threshold.
//! 4. **Grouping:** raw hits are clustered by rectangle similarity, clusters
//!    with too few members are dropped and the rest averaged.

use std::path::Path;

use anyhow::{anyhow, bail, Context};
use image::{imageops, GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::integral_image::{integral_image, integral_squared_image};
use moodlens_common::{MoodlensError, MoodlensResult, ScanParams};

/// Similarity tolerance used when grouping raw hits.
pub const GROUP_EPS: f64 = 0.2;

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Finds axis-aligned objects in a grayscale image.
///
/// Implemented by [`HaarCascade`]; tests substitute fixed responses.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage, params: &ScanParams) -> Vec<Rect>;
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<WeightedRect>,
}

/// Tree node. Child indices `> 0` point at nodes, `<= 0` at leaf `-index`.
#[derive(Debug, Clone, Copy)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// A boosted Haar cascade with a fixed base window.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<Feature>,
}

/// Borrowed view of one pyramid level's integral images.
struct Integral<'a> {
    stride: usize,
    sum: &'a [u64],
    sqsum: &'a [u64],
}

impl Integral<'_> {
    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        (table[y1 * stride + x1] + table[y0 * stride + x0])
            - (table[y0 * stride + x1] + table[y1 * stride + x0])
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(self.sum, self.stride, x, y, w, h)
    }

    fn sqsum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(self.sqsum, self.stride, x, y, w, h)
    }
}

impl Feature {
    fn evaluate(&self, ii: &Integral<'_>, x: u32, y: u32) -> f64 {
        self.rects
            .iter()
            .map(|r| r.weight * ii.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

impl HaarCascade {
    /// Load a cascade from an OpenCV XML file.
    ///
    /// Any problem with the file is reported as
    /// [`MoodlensError::DetectorUnavailable`]: the caller is expected to run
    /// without this detector rather than fail.
    pub fn load(path: &Path) -> MoodlensResult<Self> {
        if !path.exists() {
            return Err(MoodlensError::detector_unavailable(format!(
                "cascade file not found: {}",
                path.display()
            )));
        }
        let xml = std::fs::read_to_string(path).map_err(|e| {
            MoodlensError::detector_unavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_xml(&xml)
    }

    /// Parse a cascade from OpenCV XML text.
    pub fn from_xml(xml: &str) -> MoodlensResult<Self> {
        parse_cascade(xml)
            .map_err(|e| MoodlensError::detector_unavailable(format!("invalid cascade: {e:#}")))
    }

    /// Base window size `(width, height)` the cascade was trained at.
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Scan the image at every scale and return grouped detections.
    pub fn detect_multi_scale(&self, gray: &GrayImage, params: &ScanParams) -> Vec<Rect> {
        let raw = self.detect_raw(gray, params);
        group_rectangles(&raw, params.min_neighbors, GROUP_EPS)
    }

    /// Ungrouped window hits over all pyramid levels, in scan order.
    fn detect_raw(&self, gray: &GrayImage, params: &ScanParams) -> Vec<Rect> {
        if !(params.scale_factor > 1.0) {
            tracing::warn!(
                scale_factor = params.scale_factor,
                "Cascade scan skipped: scale factor must exceed 1.0"
            );
            return Vec::new();
        }

        let (img_w, img_h) = gray.dimensions();
        let (min_w, min_h) = params
            .min_size
            .unwrap_or((self.window_width, self.window_height));

        let mut hits = Vec::new();
        let mut factor = 1.0_f64;
        loop {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w <= self.window_width || scaled_h <= self.window_height {
                break;
            }

            let win_w = (self.window_width as f64 * factor).round() as u32;
            let win_h = (self.window_height as f64 * factor).round() as u32;
            if win_w >= min_w && win_h >= min_h {
                if factor == 1.0 {
                    self.scan_level(gray, factor, (win_w, win_h), (img_w, img_h), &mut hits);
                } else {
                    let level =
                        imageops::resize(gray, scaled_w, scaled_h, imageops::FilterType::Triangle);
                    self.scan_level(&level, factor, (win_w, win_h), (img_w, img_h), &mut hits);
                }
            }

            factor *= params.scale_factor;
        }

        tracing::trace!(raw_hits = hits.len(), "Cascade scan finished");
        hits
    }

    fn scan_level(
        &self,
        level: &GrayImage,
        factor: f64,
        window: (u32, u32),
        bounds: (u32, u32),
        hits: &mut Vec<Rect>,
    ) {
        let sum: Image<Luma<u64>> = integral_image::<_, u64>(level);
        let sqsum: Image<Luma<u64>> = integral_squared_image::<_, u64>(level);
        let ii = Integral {
            stride: level.width() as usize + 1,
            sum: sum.as_raw(),
            sqsum: sqsum.as_raw(),
        };

        let step = if factor > 2.0 { 1 } else { 2 };
        let max_x = level.width() - self.window_width;
        let max_y = level.height() - self.window_height;

        for y in (0..=max_y).step_by(step) {
            for x in (0..=max_x).step_by(step) {
                if self.evaluate_window(&ii, x, y) {
                    let ox = ((x as f64 * factor).round() as u32).min(bounds.0 - 1);
                    let oy = ((y as f64 * factor).round() as u32).min(bounds.1 - 1);
                    hits.push(Rect::new(
                        ox,
                        oy,
                        window.0.min(bounds.0 - ox),
                        window.1.min(bounds.1 - oy),
                    ));
                }
            }
        }
    }

    fn evaluate_window(&self, ii: &Integral<'_>, x: u32, y: u32) -> bool {
        // Normalize over the window shrunk by one pixel on each side.
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = (nw * nh) as f64;
        let s = ii.sum(x + 1, y + 1, nw, nh) as f64;
        let sq = ii.sqsum(x + 1, y + 1, nw, nh) as f64;
        let nf = area * sq - s * s;
        let norm = if nf > 0.0 { nf.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut total = 0.0;
            for weak in &stage.classifiers {
                let mut idx: i32 = 0;
                loop {
                    let node = &weak.nodes[idx as usize];
                    let value = self.features[node.feature].evaluate(ii, x, y);
                    idx = if value < node.threshold * norm {
                        node.left
                    } else {
                        node.right
                    };
                    if idx <= 0 {
                        break;
                    }
                }
                total += weak.leaves[(-idx) as usize];
            }
            if total < stage.threshold {
                return false;
            }
        }
        true
    }
}

impl ObjectDetector for HaarCascade {
    fn detect(&self, gray: &GrayImage, params: &ScanParams) -> Vec<Rect> {
        self.detect_multi_scale(gray, params)
    }
}

/// Cluster similar rectangles and average each cluster.
///
/// Clusters need more than `min_neighbors` members to survive. A surviving
/// rectangle that sits inside a stronger one is dropped as well. With
/// `min_neighbors == 0` the input is returned unchanged.
pub fn group_rectangles(rects: &[Rect], min_neighbors: u32, eps: f64) -> Vec<Rect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let labels = partition(rects, eps);
    let class_count = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![[0.0_f64; 4]; class_count];
    let mut counts = vec![0u32; class_count];
    for (rect, &label) in rects.iter().zip(&labels) {
        let acc = &mut sums[label];
        acc[0] += rect.x as f64;
        acc[1] += rect.y as f64;
        acc[2] += rect.width as f64;
        acc[3] += rect.height as f64;
        counts[label] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(&counts)
        .map(|(acc, &n)| {
            let s = 1.0 / n as f64;
            Rect::new(
                (acc[0] * s).round() as u32,
                (acc[1] * s).round() as u32,
                (acc[2] * s).round() as u32,
                (acc[3] * s).round() as u32,
            )
        })
        .collect();

    let mut grouped = Vec::new();
    for (i, (r1, &n1)) in averaged.iter().zip(&counts).enumerate() {
        if n1 <= min_neighbors {
            continue;
        }
        let swallowed = averaged.iter().zip(&counts).enumerate().any(|(j, (r2, &n2))| {
            if i == j || n2 <= min_neighbors || r1 == r2 {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let inside = r1.x as i64 >= r2.x as i64 - dx
                && r1.y as i64 >= r2.y as i64 - dy
                && r1.right() as i64 <= r2.right() as i64 + dx
                && r1.bottom() as i64 <= r2.bottom() as i64 + dy;
            inside && (n2 > n1.max(3) || n1 < 3)
        });
        if !swallowed {
            grouped.push(*r1);
        }
    }
    grouped
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

/// Equivalence classes under `similar`, numbered by first appearance.
fn partition(rects: &[Rect], eps: f64) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..rects.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; rects.len()];
    let mut next = 0;
    (0..rects.len())
        .map(|i| {
            let root = find(&mut parent, i);
            if class_of_root[root] == usize::MAX {
                class_of_root[root] = next;
                next += 1;
            }
            class_of_root[root]
        })
        .collect()
}

// --- XML loading -----------------------------------------------------------

type XmlNode<'a, 'input> = roxmltree::Node<'a, 'input>;

fn child<'a, 'input>(node: XmlNode<'a, 'input>, name: &str) -> Option<XmlNode<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.has_tag_name(name))
}

fn require<'a, 'input>(node: XmlNode<'a, 'input>, name: &str) -> anyhow::Result<XmlNode<'a, 'input>> {
    child(node, name).ok_or_else(|| anyhow!("missing <{name}>"))
}

/// The anonymous `<_>` list items OpenCV uses for sequences.
fn items<'a, 'input>(node: XmlNode<'a, 'input>) -> impl Iterator<Item = XmlNode<'a, 'input>> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name("_"))
}

fn text<'a>(node: XmlNode<'a, '_>) -> &'a str {
    node.text().unwrap_or("").trim()
}

fn numbers(node: XmlNode<'_, '_>) -> anyhow::Result<Vec<f64>> {
    text(node)
        .split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .with_context(|| format!("bad number {t:?} in <{}>", node.tag_name().name()))
        })
        .collect()
}

fn scalar(node: XmlNode<'_, '_>, name: &str) -> anyhow::Result<f64> {
    let n = require(node, name)?;
    match numbers(n)?.as_slice() {
        [v] => Ok(*v),
        _ => bail!("<{name}> must hold a single number"),
    }
}

fn parse_cascade(xml: &str) -> anyhow::Result<HaarCascade> {
    let doc = roxmltree::Document::parse(xml).context("malformed XML")?;
    let cascade = child(doc.root_element(), "cascade")
        .ok_or_else(|| anyhow!("missing <cascade>; legacy cascade layouts are not supported"))?;

    let stage_type = text(require(cascade, "stageType")?);
    if stage_type != "BOOST" {
        bail!("unsupported stage type {stage_type:?}");
    }
    let feature_type = text(require(cascade, "featureType")?);
    if feature_type != "HAAR" {
        bail!("unsupported feature type {feature_type:?}");
    }

    let window_width = scalar(cascade, "width")? as u32;
    let window_height = scalar(cascade, "height")? as u32;
    if window_width < 3 || window_height < 3 {
        bail!("window {window_width}x{window_height} is too small");
    }

    let features = items(require(cascade, "features")?)
        .enumerate()
        .map(|(i, f)| parse_feature(f, window_width, window_height).with_context(|| format!("feature {i}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let stages = items(require(cascade, "stages")?)
        .enumerate()
        .map(|(i, s)| parse_stage(s, features.len()).with_context(|| format!("stage {i}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if stages.is_empty() {
        bail!("cascade has no stages");
    }

    Ok(HaarCascade {
        window_width,
        window_height,
        stages,
        features,
    })
}

fn parse_feature(node: XmlNode<'_, '_>, win_w: u32, win_h: u32) -> anyhow::Result<Feature> {
    if let Some(tilted) = child(node, "tilted") {
        if text(tilted) != "0" {
            bail!("tilted features are not supported");
        }
    }

    let rects = items(require(node, "rects")?)
        .map(|r| {
            let v = numbers(r)?;
            let [x, y, w, h, weight] = v.as_slice() else {
                bail!("rect needs 5 values, got {}", v.len());
            };
            let rect = WeightedRect {
                x: *x as u32,
                y: *y as u32,
                width: *w as u32,
                height: *h as u32,
                weight: *weight,
            };
            if rect.x + rect.width > win_w || rect.y + rect.height > win_h {
                bail!("rect exceeds the {win_w}x{win_h} window");
            }
            Ok(rect)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if rects.is_empty() {
        bail!("feature has no rects");
    }
    Ok(Feature { rects })
}

fn parse_stage(node: XmlNode<'_, '_>, feature_count: usize) -> anyhow::Result<Stage> {
    let threshold = scalar(node, "stageThreshold")?;

    let classifiers = items(require(node, "weakClassifiers")?)
        .map(|w| {
            let raw = numbers(require(w, "internalNodes")?)?;
            if raw.is_empty() || raw.len() % 4 != 0 {
                bail!("internalNodes must hold groups of 4 values");
            }
            let nodes: Vec<Node> = raw
                .chunks_exact(4)
                .map(|c| Node {
                    left: c[0] as i32,
                    right: c[1] as i32,
                    feature: c[2] as usize,
                    threshold: c[3],
                })
                .collect();
            let leaves = numbers(require(w, "leafValues")?)?;

            for node in &nodes {
                if node.feature >= feature_count {
                    bail!("feature index {} out of range", node.feature);
                }
                for next in [node.left, node.right] {
                    let ok = if next > 0 {
                        (next as usize) < nodes.len()
                    } else {
                        ((-next) as usize) < leaves.len()
                    };
                    if !ok {
                        bail!("child index {next} out of range");
                    }
                }
            }
            Ok(WeakClassifier { nodes, leaves })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Stage {
        threshold,
        classifiers,
    })
}

/// A one-stage, one-stump cascade that fires on a dark-left / bright-right edge
/// inside a 6x6 window. Shared by tests across the crate.
#[cfg(test)]
pub(crate) const EDGE_CASCADE_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>6</height>
  <width>6</width>
  <stageParams><maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams><maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 5.0000000000000000e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 6 6 -1.</_>
        <_>
          3 0 3 6 2.</_></rects></_></features></cascade>
</opencv_storage>
"#;
