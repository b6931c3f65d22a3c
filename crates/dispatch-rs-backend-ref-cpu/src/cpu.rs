use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use dispatch_rs::backend::{
    BackendError, BackendResult, Feed, Graph, GraphBackend, Node, NodeId, NodeSpec, Operation,
};
use dispatch_rs::tensor::{HostValues, Tensor};
use tracing::{debug, trace};

use crate::kernels;

/// Validated graph ready for interpretation.
#[derive(Debug, Clone)]
pub struct CpuExecutable {
    graph: Graph,
}

impl CpuExecutable {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

/// Host interpreter for dispatch graphs.
///
/// Compilation only validates the graph; execution walks the nodes in order and keeps every
/// intermediate as logical-order host values. Compile and execute calls are counted so callers
/// can observe graph-cache behavior.
#[derive(Debug, Default)]
pub struct CpuGraphBackend {
    compiles: AtomicUsize,
    executions: AtomicUsize,
}

impl CpuGraphBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }

    pub fn execute_count(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }
}

impl GraphBackend for CpuGraphBackend {
    type Executable = CpuExecutable;

    fn backend_name(&self) -> &str {
        "ref-cpu"
    }

    fn compile(&self, graph: &Graph) -> BackendResult<Self::Executable> {
        validate(graph)?;
        self.compiles.fetch_add(1, Ordering::Relaxed);
        debug!(graph = %graph.name, nodes = graph.nodes.len(), "compiled graph");
        Ok(CpuExecutable {
            graph: graph.clone(),
        })
    }

    fn execute(
        &self,
        executable: &Self::Executable,
        feeds: &[(NodeId, Feed)],
        fetches: &[(NodeId, Tensor)],
    ) -> BackendResult<()> {
        self.executions.fetch_add(1, Ordering::Relaxed);
        let graph = &executable.graph;
        let feeds: HashMap<NodeId, &Feed> = feeds.iter().map(|(id, feed)| (*id, feed)).collect();
        let mut values: Vec<HostValues> = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            let value = evaluate(graph, node, &values, &feeds)?;
            values.push(value);
        }

        for (id, destination) in fetches {
            let node = graph
                .node(*id)
                .ok_or_else(|| BackendError::execution(format!("fetch of unknown node {}", id.0)))?;
            if destination.sizes() != node.spec.shape.as_slice() {
                return Err(BackendError::execution(format!(
                    "fetch destination shape {:?} does not match node shape {:?}",
                    destination.sizes(),
                    node.spec.shape.as_slice()
                )));
            }
            destination
                .write_values(&values[id.0 as usize])
                .map_err(|err| BackendError::execution(err.to_string()))?;
        }
        trace!(graph = %graph.name, fetches = fetches.len(), "executed graph");
        Ok(())
    }
}

fn validate(graph: &Graph) -> BackendResult<()> {
    for (index, node) in graph.nodes.iter().enumerate() {
        if node.id.0 as usize != index {
            return Err(BackendError::invalid_graph(format!(
                "node {} stored at position {index}",
                node.id.0
            )));
        }
        if let Some(operand) = node.operands.iter().find(|operand| operand.0 >= node.id.0) {
            return Err(BackendError::invalid_graph(format!(
                "node {} uses operand {} that does not precede it",
                node.id.0, operand.0
            )));
        }
        let expected = match node.op {
            Operation::Placeholder(_) => 0,
            Operation::ElementwiseUnary(_) | Operation::Cast(_) => 1,
            Operation::ElementwiseBinary(_) | Operation::Compare(_) | Operation::Logical(_) => 2,
        };
        if node.operands.len() != expected {
            return Err(BackendError::invalid_graph(format!(
                "{} node {} expects {expected} operands, has {}",
                node.op.name(),
                node.id.0,
                node.operands.len()
            )));
        }
    }
    if let Some(output) = graph.outputs.iter().find(|id| graph.node(**id).is_none()) {
        return Err(BackendError::invalid_graph(format!(
            "output {} is not a node of the graph",
            output.0
        )));
    }
    Ok(())
}

fn evaluate(
    graph: &Graph,
    node: &Node,
    values: &[HostValues],
    feeds: &HashMap<NodeId, &Feed>,
) -> BackendResult<HostValues> {
    let spec = &node.spec;
    let operand = |index: usize| -> BackendResult<HostValues> {
        let id = node.operands[index];
        let source = graph
            .node(id)
            .ok_or_else(|| BackendError::execution(format!("missing operand {}", id.0)))?;
        Ok(kernels::broadcast_to(
            &values[id.0 as usize],
            &source.spec.shape,
            &spec.shape,
        ))
    };
    let operand_dtype = |index: usize| {
        graph
            .node(node.operands[index])
            .map(|source| source.spec.dtype)
            .unwrap_or(spec.dtype)
    };

    match &node.op {
        Operation::Placeholder(_) => bind_feed(node.id, spec, feeds),
        Operation::ElementwiseBinary(op) => {
            kernels::binary(*op, &operand(0)?, &operand(1)?, spec.dtype)
        }
        Operation::ElementwiseUnary(op) => Ok(kernels::unary(*op, &operand(0)?, spec.dtype)),
        Operation::Compare(op) => Ok(kernels::compare(
            *op,
            &operand(0)?,
            &operand(1)?,
            operand_dtype(0),
        )),
        Operation::Logical(op) => Ok(kernels::logical(*op, &operand(0)?, &operand(1)?)),
        Operation::Cast(dtype) => Ok(kernels::cast(&operand(0)?, *dtype)),
    }
}

fn bind_feed(
    id: NodeId,
    spec: &NodeSpec,
    feeds: &HashMap<NodeId, &Feed>,
) -> BackendResult<HostValues> {
    match feeds.get(&id) {
        Some(Feed::Buffer(tensor)) => {
            if tensor.sizes() != spec.shape.as_slice() || tensor.dtype() != spec.dtype {
                return Err(BackendError::execution(format!(
                    "placeholder {} declared {:?}{:?}, fed {:?}{:?}",
                    id.0,
                    spec.dtype,
                    spec.shape.as_slice(),
                    tensor.dtype(),
                    tensor.sizes()
                )));
            }
            Ok(tensor.read_values())
        }
        Some(Feed::Scalar(value)) => Ok(kernels::cast(
            &HostValues::from_scalars(spec.dtype, [*value]),
            spec.dtype,
        )),
        None => Err(BackendError::execution(format!(
            "placeholder {} was not fed",
            id.0
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_rs::backend::{ElementwiseBinaryOp, GraphBuilder};
    use dispatch_rs::tensor::{DType, Scalar};

    #[test]
    fn executes_scalar_broadcast_add() -> anyhow::Result<()> {
        let backend = CpuGraphBackend::new();
        let mut builder = GraphBuilder::new("add");
        let lhs = builder.placeholder(DType::F32, &[3]);
        let rhs = builder.scalar_placeholder(DType::F32);
        let sum = builder.binary(ElementwiseBinaryOp::Add, lhs, rhs)?;
        let executable = backend.compile(&builder.finish(vec![sum])?)?;

        let input = Tensor::from_vec(&[3], vec![1.0f32, 2.0, 3.0])?;
        let output = Tensor::zeros(&[3], DType::F32);
        backend.execute(
            &executable,
            &[
                (lhs, Feed::Buffer(input)),
                (rhs, Feed::Scalar(Scalar::Float(0.5))),
            ],
            &[(sum, output.clone())],
        )?;
        assert_eq!(output.to_vec::<f32>()?, vec![1.5, 2.5, 3.5]);
        assert_eq!(backend.compile_count(), 1);
        assert_eq!(backend.execute_count(), 1);
        Ok(())
    }

    #[test]
    fn missing_feed_is_an_execution_error() -> anyhow::Result<()> {
        let backend = CpuGraphBackend::new();
        let mut builder = GraphBuilder::new("unfed");
        let input = builder.placeholder(DType::I32, &[2]);
        let executable = backend.compile(&builder.finish(vec![input])?)?;
        let err = backend.execute(&executable, &[], &[(input, Tensor::zeros(&[2], DType::I32))]);
        assert!(matches!(err, Err(BackendError::Execution { .. })));
        Ok(())
    }
}
