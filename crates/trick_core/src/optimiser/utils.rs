use std::{
    fs::File,
    io::{self, Error, ErrorKind, Read, Write},
};

use crate::graph::Graph;

/// Where weight decay is applied relative to the inner optimiser step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Weights are scaled before the step (decoupled, as in AdamW).
    Before,
    /// `decay * weights` is added to the gradient (L2 regularisation).
    Gradient,
}

fn invalid_data(msg: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidData, msg.to_string())
}

/// Ids of everything in the graph that should survive a restart:
/// trainable weights and persistent state such as running statistics.
fn persistent_ids(graph: &Graph) -> Vec<String> {
    let mut ids = graph.weight_ids();
    ids.extend(graph.state_ids());
    ids
}

/// Writes the weights and state of a graph to a file.
pub fn write_graph_to_file(graph: &Graph, path: &str) -> io::Result<()> {
    let mut buf = Vec::new();

    for id in &graph.weight_ids() {
        let weights = graph.get_weights(id).map_err(invalid_data)?;
        buf.extend_from_slice(&weights.values.write_to_byte_buffer(id)?);
    }

    for id in &graph.state_ids() {
        let state = graph.get_state(id).map_err(invalid_data)?;
        buf.extend_from_slice(&state.values.write_to_byte_buffer(id)?);
    }

    let mut file = File::create(path)?;
    file.write_all(&buf)
}

/// Loads weights and state written by [`write_graph_to_file`] into a graph
/// with the same structure. Every persistent tensor must be present.
pub fn load_graph_from_file(graph: &mut Graph, path: &str) -> io::Result<()> {
    let tensors = load_weights_from_file(path)?;
    let expected = persistent_ids(graph);

    if let Some(missing) = expected.iter().find(|id| !tensors.iter().any(|(found, _)| found == *id)) {
        return Err(invalid_data(format!("'{missing}' is missing from {path}")));
    }

    for (id, values) in tensors {
        graph.load_persistent(&id, &values).map_err(invalid_data)?;
    }

    Ok(())
}

/// Loads a set of labelled tensors from a file.
pub fn load_weights_from_file(path: &str) -> io::Result<Vec<(String, Vec<f32>)>> {
    let mut buf = Vec::new();
    let mut file = File::open(path)?;
    file.read_to_end(&mut buf)?;

    let mut offset = 0;
    let mut res = Vec::new();

    while offset < buf.len() {
        let (values, id, bytes_read) = read_from_byte_buffer(&buf[offset..])?;
        res.push((id, values));
        offset += bytes_read;
    }

    Ok(res)
}

/// Reads a tensor from a byte buffer, returning its values, its ID and
/// how many bytes were read.
pub fn read_from_byte_buffer(bytes: &[u8]) -> io::Result<(Vec<f32>, String, usize)> {
    const USIZE: usize = std::mem::size_of::<usize>();

    let newline = bytes.iter().position(|&ch| ch == b'\n').ok_or_else(|| invalid_data("Unterminated ID"))?;
    let id = std::str::from_utf8(&bytes[..newline]).map_err(invalid_data)?.to_string();
    let mut offset = newline + 1;

    let size_bytes = bytes.get(offset..offset + USIZE).ok_or_else(|| invalid_data("Truncated size"))?;
    let mut single_size = [0u8; USIZE];
    single_size.copy_from_slice(size_bytes);
    offset += USIZE;

    let single_size = usize::from_le_bytes(single_size);
    let total_read = single_size.checked_mul(4).and_then(|len| offset.checked_add(len));
    let words = total_read
        .and_then(|end| bytes.get(offset..end))
        .ok_or_else(|| invalid_data(format!("Truncated values for '{id}'")))?;

    let mut values = vec![0.0; single_size];

    for (word, val) in words.chunks_exact(4).zip(values.iter_mut()) {
        let mut buf = [0; 4];
        buf.copy_from_slice(word);
        *val = f32::from_le_bytes(buf);
    }

    Ok((values, id, offset + words.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tensor::DenseTensor, Shape};

    #[test]
    fn read_back_written_tensor() {
        let tensor = DenseTensor::from_slice(Shape::from([2, 2]), &[1.0, -2.0, 3.5, 0.0]);
        let mut bytes = tensor.write_to_byte_buffer("w").unwrap();
        bytes.extend_from_slice(b"trailing");

        let (values, id, read) = read_from_byte_buffer(&bytes).unwrap();

        assert_eq!(id, "w");
        assert_eq!(values, vec![1.0, -2.0, 3.5, 0.0]);
        assert_eq!(read, bytes.len() - 8);
    }

    #[test]
    fn truncated_buffers() {
        let tensor = DenseTensor::from_slice(Shape::from([3]), &[1.0, 2.0, 3.0]);
        let bytes = tensor.write_to_byte_buffer("w").unwrap();

        assert!(read_from_byte_buffer(&bytes[..bytes.len() - 1]).is_err());
        assert!(read_from_byte_buffer(&bytes[..4]).is_err());
        assert!(read_from_byte_buffer(b"no newline").is_err());
    }
}
