//! Native operations: ordinary code bound to declared parameters.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    InvokeError, Operation, OperationContext, OperationInput, OperationKind, OperationMeta,
    OperationRef, ParameterMeta,
};

/// Code behind a native operation
#[async_trait]
pub trait NativeFunction: Send + Sync {
    async fn call(&self, input: OperationInput, ctx: &OperationContext)
        -> Result<String, InvokeError>;
}

struct FnNative<F>(F);

#[async_trait]
impl<F, Fut> NativeFunction for FnNative<F>
where
    F: Fn(OperationInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, InvokeError>> + Send,
{
    async fn call(
        &self,
        input: OperationInput,
        _ctx: &OperationContext,
    ) -> Result<String, InvokeError> {
        (self.0)(input).await
    }
}

/// Operation backed by a [`NativeFunction`]
pub struct NativeOperation {
    meta: OperationMeta,
    function: Arc<dyn NativeFunction>,
}

impl NativeOperation {
    pub fn new(
        reference: OperationRef,
        description: impl Into<String>,
        parameters: Vec<ParameterMeta>,
        function: Arc<dyn NativeFunction>,
    ) -> Self {
        Self {
            meta: OperationMeta::new(reference, OperationKind::Native, description)
                .with_parameters(parameters),
            function,
        }
    }

    /// Wrap an async closure.
    pub fn from_fn<F, Fut>(
        reference: OperationRef,
        description: impl Into<String>,
        parameters: Vec<ParameterMeta>,
        f: F,
    ) -> Self
    where
        F: Fn(OperationInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, InvokeError>> + Send + 'static,
    {
        Self::new(reference, description, parameters, Arc::new(FnNative(f)))
    }
}

#[async_trait]
impl Operation for NativeOperation {
    fn metadata(&self) -> &OperationMeta {
        &self.meta
    }

    async fn invoke(
        &self,
        input: OperationInput,
        ctx: OperationContext,
    ) -> Result<String, InvokeError> {
        self.function.call(input, &ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fn_operation_binds_declared_parameter() {
        tokio_test::block_on(async {
            let operation = NativeOperation::from_fn(
                OperationRef::new("text", "Upper"),
                "Uppercase the input",
                vec![ParameterMeta::required("input", "text to convert")],
                |input: OperationInput| async move {
                    Ok::<_, InvokeError>(input.require("input")?.to_uppercase())
                },
            );

            assert_eq!(operation.metadata().kind, OperationKind::Native);
            assert_eq!(operation.reference().to_string(), "text.Upper");
            let output = operation
                .invoke(
                    OperationInput::new().with_value("input", "rows"),
                    OperationContext::new("exec", 0),
                )
                .await
                .expect("invoke");
            assert_eq!(output, "ROWS");
        });
    }

    #[test]
    fn test_from_fn_operation_surfaces_missing_input() {
        tokio_test::block_on(async {
            let operation = NativeOperation::from_fn(
                OperationRef::new("text", "Upper"),
                "Uppercase the input",
                vec![ParameterMeta::required("input", "")],
                |input: OperationInput| async move {
                    Ok::<_, InvokeError>(input.require("input")?.to_string())
                },
            );
            let err = operation
                .invoke(OperationInput::new(), OperationContext::new("exec", 0))
                .await
                .expect_err("missing");
            assert!(matches!(err, InvokeError::MissingInput(_)));
        });
    }
}
