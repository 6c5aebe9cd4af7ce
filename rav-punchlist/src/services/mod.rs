//! Punch-list services: adapters, pure logic and the orchestrator

pub mod assignment;
pub mod extraction;
pub mod messaging;
pub mod pipeline;
pub mod reply_parser;
pub mod scorer;
pub mod trades;
pub mod transcription;
pub mod worker;

pub use assignment::{AssignOutcome, CandidateView, ManualAssignOutcome};
pub use extraction::{ExtractedItem, ExtractionContext, ExtractionError, KeywordExtractor, OpenAiExtractor, TaskExtractor};
pub use messaging::{DeliveryReceipt, GatewayError, MessageGateway, TwilioGateway};
pub use pipeline::{ActionOutcome, ActionReport, ActionRequest, PipelineReport, PunchListPipeline, StageReport};
pub use reply_parser::{handle_reply, parse_reply, ReplyIntent, ReplyUpdate};
pub use transcription::{
    FetchedAudio, HttpMediaFetcher, MediaFetcher, Transcriber, Transcript, TranscriptionError,
    WhisperTranscriber,
};
pub use worker::{JobQueue, JobWorker};
