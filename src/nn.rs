//! Neural Network inference.
//!
//! Networks are ONNX files executed on the CPU with `tract`.

use std::{
    ops::{Range, RangeInclusive},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context};
use tract_onnx::prelude::{
    tract_ndarray::{Array4, ArrayViewD},
    Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, TValue, TVec, Tensor, TypedFact,
    TypedOp,
};

use crate::image::{AsImageView, Color, ImageView, Resolution};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A convolutional neural network (CNN) that operates on image data.
pub struct Cnn {
    nn: NeuralNetwork,
    shape: CnnInputShape,
    input_res: Resolution,
    color_mapper: ColorMapper,
}

impl Cnn {
    /// Creates a CNN wrapper from a [`NeuralNetwork`].
    ///
    /// The network must have exactly one input with a shape that matches the given
    /// [`CnnInputShape`], and a channel count matching the [`ColorMapper`].
    pub fn new(
        nn: NeuralNetwork,
        shape: CnnInputShape,
        color_mapper: ColorMapper,
    ) -> anyhow::Result<Self> {
        let input_res = Self::get_input_res(&nn, shape, color_mapper.channels())?;
        Ok(Self {
            nn,
            shape,
            input_res,
            color_mapper,
        })
    }

    fn get_input_res(
        nn: &NeuralNetwork,
        shape: CnnInputShape,
        channels: usize,
    ) -> anyhow::Result<Resolution> {
        if nn.num_inputs() != 1 {
            bail!(
                "CNN network has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        }

        let input_info = nn
            .inputs()
            .next()
            .ok_or_else(|| anyhow!("network has no input information"))??;
        let tensor_shape = input_info.shape();

        let (w, h) = match (shape, tensor_shape) {
            (CnnInputShape::NCHW, &[1, c, h, w]) | (CnnInputShape::NHWC, &[1, h, w, c])
                if c == channels =>
            {
                (w, h)
            }
            _ => {
                bail!(
                    "invalid model input shape for {:?} CNN with {} channels: {:?}",
                    shape,
                    channels,
                    tensor_shape,
                );
            }
        };

        let (w, h): (u32, u32) = (w.try_into()?, h.try_into()?);
        Ok(Resolution::new(w, h))
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Runs the network on an input image, returning the estimated outputs.
    ///
    /// The input image will be sampled to create the network's input tensor. If the image's aspect
    /// ratio does not match the network's input aspect ratio, the image will be stretched.
    pub fn estimate<V: AsImageView>(&self, image: &V) -> anyhow::Result<Outputs> {
        let tensor = image_to_tensor(
            image.as_view(),
            self.input_res,
            self.shape,
            &self.color_mapper,
        );
        self.nn.estimate(tensor)
    }
}

/// Samples `view` at the network input resolution and maps each pixel through `mapper`.
fn image_to_tensor(
    view: ImageView<'_>,
    input_res: Resolution,
    shape: CnnInputShape,
    mapper: &ColorMapper,
) -> Tensor {
    let (h, w) = (input_res.height() as usize, input_res.width() as usize);
    let c = mapper.channels();
    let (vw, vh) = (view.width() as f32, view.height() as f32);

    let sample = |x: usize, y: usize| -> Color {
        let u = (x as f32 + 0.5) / w as f32;
        let v = (y as f32 + 0.5) / h as f32;
        view.get((u * vw) as u32, (v * vh) as u32)
    };

    let array = match shape {
        CnnInputShape::NCHW => Array4::from_shape_fn((1, c, h, w), |(_, c, y, x)| {
            mapper.map(sample(x, y), c)
        }),
        CnnInputShape::NHWC => Array4::from_shape_fn((1, h, w, c), |(_, y, x, c)| {
            mapper.map(sample(x, y), c)
        }),
    };
    array.into_tensor()
}

enum ColorMapperKind {
    Linear,
    Grayscale,
}

/// Maps sRGB pixel colors to the values a network expects as input.
pub struct ColorMapper {
    kind: ColorMapperKind,
    target_range: RangeInclusive<f32>,
}

impl ColorMapper {
    /// Creates a color mapper that uniformly maps the R, G, and B channels to `target_range`.
    ///
    /// Note that this operates on *non-linear* sRGB colors, but maps them linearly to the target
    /// range.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());

        Self {
            kind: ColorMapperKind::Linear,
            target_range,
        }
    }

    /// Creates a color mapper producing a single luma channel, mapped to `target_range`.
    pub fn grayscale(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());

        Self {
            kind: ColorMapperKind::Grayscale,
            target_range,
        }
    }

    /// Returns the number of channels this mapper produces per pixel.
    pub fn channels(&self) -> usize {
        match self.kind {
            ColorMapperKind::Linear => 3,
            ColorMapperKind::Grayscale => 1,
        }
    }

    fn map(&self, color: Color, channel: usize) -> f32 {
        let start = *self.target_range.start();
        let end = *self.target_range.end();
        let adjust_range = (end - start) / 255.0;

        let value = match self.kind {
            ColorMapperKind::Linear => f32::from(color[channel]),
            ColorMapperKind::Grayscale => color.luma(),
        };
        value * adjust_range + start
    }
}

/// Describes in what order a CNN expects its input image data.
///
/// - `N` is the number of images, fixed at 1.
/// - `C` is the number of color channels, 3 for RGB inputs or 1 for grayscale.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CnnInputShape {
    /// Shape is `[N, C, H, W]`.
    NCHW,
    /// Shape is `[N, H, W, C]`.
    NHWC,
}

/// Neural network loader.
pub struct Loader {
    path: PathBuf,
    outputs: Option<Vec<usize>>,
}

impl Loader {
    /// Only compute the specified outputs during inference.
    ///
    /// This takes a list of network output indices. The [`Outputs`] returned from
    /// [`NeuralNetwork::estimate`] will then only contain the chosen output tensors, in the given
    /// order.
    pub fn with_output_selection<O>(mut self, outputs: O) -> Self
    where
        O: Into<Vec<usize>>,
    {
        self.outputs = Some(outputs.into());
        self
    }

    /// Loads and optimizes the network.
    ///
    /// Returns an error if the network file is missing or malformed, or if the network uses
    /// unimplemented operations.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let graph = tract_onnx::onnx()
            .model_for_path(&self.path)
            .with_context(|| format!("failed to read network from {}", self.path.display()))?
            .into_optimized()?;
        let outputs = graph.output_outlets()?;
        let selected_outputs = match self.outputs {
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    outputs
                        .get(i)
                        .copied()
                        .ok_or_else(|| anyhow!("network has no output #{i}"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => outputs.to_vec(),
        };
        let model = SimplePlan::new_for_outputs(graph, &selected_outputs)?;

        log::debug!("loaded neural network from {}", self.path.display());
        Ok(NeuralNetwork { inner: model })
    }
}

/// A neural network that can be used for inference.
pub struct NeuralNetwork {
    inner: Model,
}

impl NeuralNetwork {
    /// Prepares loading a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Loader> {
        let path = path.as_ref();
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!(
                "neural network path must have `.onnx` extension: {}",
                path.display()
            ),
        }

        Ok(Loader {
            path: path.to_path_buf(),
            outputs: None,
        })
    }

    /// Returns the number of input nodes of the network.
    pub fn num_inputs(&self) -> usize {
        self.inner.model().inputs.len()
    }

    /// Returns an iterator over the network's input node information.
    pub fn inputs(&self) -> InputInfoIter<'_> {
        InputInfoIter {
            net: self,
            ids: 0..self.num_inputs(),
        }
    }

    /// Runs the network on a single input tensor, returning the estimated outputs.
    #[doc(alias = "infer")]
    pub fn estimate(&self, input: Tensor) -> anyhow::Result<Outputs> {
        let mut inputs = TVec::new();
        inputs.push(TValue::from_const(Arc::new(input)));
        let outputs = self.inner.run(inputs)?;
        Ok(Outputs { inner: outputs })
    }
}

/// Iterator over a [`NeuralNetwork`]s input information.
pub struct InputInfoIter<'a> {
    net: &'a NeuralNetwork,
    ids: Range<usize>,
}

impl<'a> Iterator for InputInfoIter<'a> {
    type Item = anyhow::Result<InputInfo<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;
        Some(input_info(self.net, id))
    }
}

fn input_info(net: &NeuralNetwork, id: usize) -> anyhow::Result<InputInfo<'_>> {
    let fact = net.inner.model().input_fact(id)?;
    let shape = fact
        .shape
        .as_concrete()
        .ok_or_else(|| anyhow!("network input #{id} has a symbolic shape"))?;
    Ok(InputInfo { shape })
}

/// Information about a neural network input node.
#[derive(Debug)]
pub struct InputInfo<'a> {
    shape: &'a [usize],
}

impl InputInfo<'_> {
    /// Returns the tensor shape for this input.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.shape
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's (selected) output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: TVec<TValue>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns a view of output tensor `index` as `f32` values.
    pub fn view(&self, index: usize) -> anyhow::Result<ArrayViewD<'_, f32>> {
        let tensor = self
            .inner
            .get(index)
            .ok_or_else(|| anyhow!("network produced {} outputs, no #{index}", self.len()))?;
        tensor.to_array_view::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use tract_onnx::prelude::tract_ndarray::Ix4;

    use crate::image::Image;

    use super::*;

    #[test]
    fn color_mapper() {
        let mapper = ColorMapper::linear(-1.0..=1.0);
        assert_eq!(mapper.channels(), 3);
        assert_eq!(mapper.map(Color::BLACK, 0), -1.0);
        assert_eq!(mapper.map(Color::WHITE, 2), 1.0);

        let mapper = ColorMapper::linear(1.0..=2.0);
        assert_eq!(mapper.map(Color::BLACK, 1), 1.0);
        assert_eq!(mapper.map(Color::WHITE, 1), 2.0);
        assert_eq!(mapper.map(Color::RED, 0), 2.0);
        assert_eq!(mapper.map(Color::RED, 1), 1.0);
    }

    #[test]
    fn grayscale_mapper_keeps_pixel_range() {
        let mapper = ColorMapper::grayscale(0.0..=255.0);
        assert_eq!(mapper.channels(), 1);
        assert_eq!(mapper.map(Color::BLACK, 0), 0.0);
        assert_eq!(mapper.map(Color::WHITE, 0).round(), 255.0);
    }

    #[test]
    fn tensor_layout() {
        let mut image = Image::new(4, 2);
        image.clear(Color::BLACK);
        image.set(3, 0, Color::WHITE);
        let mapper = ColorMapper::linear(0.0..=1.0);

        let res = Resolution::new(4, 2);
        let nchw = image_to_tensor(image.as_view(), res, CnnInputShape::NCHW, &mapper);
        assert_eq!(nchw.shape(), &[1, 3, 2, 4]);
        let nchw = nchw
            .to_array_view::<f32>()
            .unwrap()
            .into_dimensionality::<Ix4>()
            .unwrap();
        assert_eq!(nchw[[0, 1, 0, 3]], 1.0);
        assert_eq!(nchw[[0, 1, 1, 3]], 0.0);

        let nhwc = image_to_tensor(image.as_view(), res, CnnInputShape::NHWC, &mapper);
        assert_eq!(nhwc.shape(), &[1, 2, 4, 3]);
        let nhwc = nhwc
            .to_array_view::<f32>()
            .unwrap()
            .into_dimensionality::<Ix4>()
            .unwrap();
        assert_eq!(nhwc[[0, 0, 3, 2]], 1.0);
        assert_eq!(nhwc[[0, 0, 2, 2]], 0.0);
    }

    #[test]
    fn tensor_resamples_view() {
        let mut image = Image::new(8, 8);
        image.clear(Color::WHITE);
        let mapper = ColorMapper::grayscale(0.0..=1.0);

        let tensor = image_to_tensor(
            image.as_view(),
            Resolution::new(2, 2),
            CnnInputShape::NCHW,
            &mapper,
        );
        let tensor = tensor.to_array_view::<f32>().unwrap();
        assert_eq!(tensor.shape(), &[1, 1, 2, 2]);
        for value in tensor.iter() {
            assert!((value - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn rejects_non_onnx_path() {
        assert!(NeuralNetwork::from_path("models/face.tflite").is_err());
        assert!(NeuralNetwork::from_path("models/face.onnx").is_ok());
    }
}
