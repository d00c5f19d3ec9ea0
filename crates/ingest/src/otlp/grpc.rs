use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use tonic::codec::CompressionEncoding;
use tonic::{Request, Response, Status};

use crate::otlp::decode::decode_request;
use crate::sink::SpanSink;

#[derive(Clone)]
pub struct GrpcIngest {
    sink: SpanSink,
}

impl GrpcIngest {
    pub fn new(sink: SpanSink) -> Self {
        Self { sink }
    }

    pub fn traces_service(&self) -> TraceServiceServer<Self> {
        TraceServiceServer::new(self.clone()).accept_compressed(CompressionEncoding::Gzip)
    }
}

#[tonic::async_trait]
impl TraceService for GrpcIngest {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> std::result::Result<Response<ExportTraceServiceResponse>, Status> {
        let spans = decode_request(request.get_ref());
        self.sink.accept(spans, "grpc").await;
        Ok(Response::new(ExportTraceServiceResponse::default()))
    }
}
